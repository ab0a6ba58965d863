//! Task commands: submit, process, retry, flush, reset.

use anyhow::Result;

use gitvault_core::models::{FlushReport, TaskOutcome, TaskParams};

use crate::coordinator::CoordinatorHandle;

pub async fn run_submit(handle: &CoordinatorHandle, params: TaskParams, process: bool) -> Result<()> {
    let task_id = handle.submit_task(params).await?;
    println!("Submitted task {}", task_id);
    if process {
        let outcome = handle.process_and_wait(&task_id).await?;
        print_outcome(&outcome);
    }
    Ok(())
}

pub async fn run_process(handle: &CoordinatorHandle, task_id: &str) -> Result<()> {
    let outcome = handle.process_and_wait(task_id).await?;
    print_outcome(&outcome);
    Ok(())
}

pub async fn run_retry_pending(handle: &CoordinatorHandle) -> Result<()> {
    let results = handle.retry_pending().await?;
    if results.is_empty() {
        println!("No pending tasks.");
        return Ok(());
    }
    let mut failed = 0;
    for (task_id, result) in &results {
        match result {
            Ok(outcome) => print_outcome(outcome),
            Err(e) => {
                failed += 1;
                println!("Task {} failed: {}", task_id, e);
            }
        }
    }
    println!();
    println!(
        "Retried {} task(s): {} completed, {} still pending.",
        results.len(),
        results.len() - failed,
        failed
    );
    Ok(())
}

pub async fn run_flush(handle: &CoordinatorHandle) -> Result<()> {
    let report = handle.flush_index().await?;
    println!("{}", describe_flush(&report));
    Ok(())
}

pub async fn run_reset(handle: &CoordinatorHandle) -> Result<()> {
    handle.reset_all().await?;
    println!("Tenant {} reset.", handle.tenant());
    Ok(())
}

fn print_outcome(outcome: &TaskOutcome) {
    if outcome.already_completed {
        println!("Task {} already completed.", outcome.task_id);
        return;
    }
    println!("Task {} completed.", outcome.task_id);
    if let Some(path) = &outcome.remote_path {
        println!("  path: {}", path);
    }
    if let Some(sha) = &outcome.sha {
        println!("  sha:  {}", sha);
    }
    if let Some(report) = &outcome.flush {
        println!("  {}", describe_flush(report));
    }
}

fn describe_flush(report: &FlushReport) -> String {
    match report {
        FlushReport::Empty => "Title index buffer empty; nothing to flush.".to_string(),
        FlushReport::Written { entries, files } => {
            format!("Flushed {} title(s) to {} index file(s).", entries, files)
        }
        FlushReport::Deferred { entries, reason } => {
            format!("Flush deferred ({} buffered): {}", entries, reason)
        }
    }
}
