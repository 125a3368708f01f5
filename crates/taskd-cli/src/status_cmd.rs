//! `taskd status` / `taskd show` / `taskd list`: read-only task inspection.

use taskd_core::TaskManager;
use taskd_db::{Task, TaskStatus};

/// Show a single task's full record.
pub async fn run_show(mgr: &TaskManager, id: i64) -> anyhow::Result<()> {
    match mgr.get_task(id).await? {
        Some(task) => {
            print_task_detail(&task);
            Ok(())
        }
        None => anyhow::bail!("task {id} not found"),
    }
}

/// List tasks, optionally filtered by status or name.
pub async fn run_list(
    mgr: &TaskManager,
    status: Option<TaskStatus>,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let tasks = match (status, name) {
        (Some(status), _) => mgr.get_tasks_by_status(status).await?,
        (None, Some(name)) => mgr.get_tasks_by_name(name).await?,
        (None, None) => {
            let mut all = Vec::new();
            for status in [
                TaskStatus::Pending,
                TaskStatus::Running,
                TaskStatus::Completed,
                TaskStatus::PermanentlyFailed,
                TaskStatus::Paused,
            ] {
                all.extend(mgr.get_tasks_by_status(status).await?);
            }
            all.sort_by_key(|t| t.id);
            all
        }
    };

    print_task_table(&tasks);
    Ok(())
}

fn print_task_table(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }

    println!(
        "{:<6} {:<24} {:<8} {:<18} {:>4} {:>8} {:>6} {}",
        "ID", "NAME", "TYPE", "STATUS", "PRI", "NEXTRUN", "TRIES", "ERROR"
    );
    for task in tasks {
        println!(
            "{:<6} {:<24} {:<8} {:<18} {:>4} {:>8} {:>6} {}",
            task.id,
            truncate(&task.name, 24),
            task.task_type,
            task.status,
            task.priority,
            task.next_run_time,
            format!("{}/{}", task.retry_count, task.max_retries + 1),
            task.error.as_deref().unwrap_or(""),
        );
    }
}

fn print_task_detail(task: &Task) {
    println!("Task #{}", task.id);
    println!("  name:             {}", task.name);
    println!("  type:             {}", task.task_type);
    println!("  status:           {}", task.status);
    println!("  priority:         {}", task.priority);
    println!("  payload:          {}", task.payload);
    if let Some(cron_expr) = &task.cron_expr {
        println!("  cron_expr:        {cron_expr}");
    }
    println!("  next_run_time:    {}", task.next_run_time);
    if let Some(last_active) = task.last_active_time {
        println!("  last_active_time: {last_active}");
    }
    println!("  timeout:          {}s", task.timeout);
    println!(
        "  attempts:         {}/{}",
        task.retry_count,
        task.max_retries + 1
    );
    println!("  retry_interval:   {}s", task.retry_interval);
    println!("  created_at:       {}", task.created_at);
    if let Some(result) = &task.result {
        println!("  result:           {result}");
    }
    if let Some(error) = &task.error {
        println!("  error:            {error}");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max.saturating_sub(3)])
    } else {
        s.to_string()
    }
}
