//! Priority Lanes Example
//!
//! This example demonstrates priority-lane dispatch:
//! 1. Higher priority lanes are served first
//! 2. Tasks in the same lane run in submission order
//! 3. Failing tasks are logged without stopping the pool

use a3s_dispatch::{priorities, Dispatcher, Priority};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== A3S Dispatch: Priority Lanes ===\n");

    // A single worker makes the dispatch order fully visible
    let dispatcher = Dispatcher::builder().with_max_workers(1).build()?;
    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    // Occupy the worker so everything below queues up first
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    dispatcher.queue_for(priorities::BACKGROUND).submit(move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv_timeout(Duration::from_secs(5));
    })?;
    started_rx.recv_timeout(Duration::from_secs(5))?;

    let plan: [(&str, Priority); 5] = [
        ("low-1", priorities::LOW),
        ("high-1", priorities::HIGH),
        ("default-1", priorities::DEFAULT),
        ("high-2", priorities::HIGH),
        ("custom-1", 1),
    ];
    for (name, priority) in plan {
        let order = Arc::clone(&order);
        dispatcher.queue_for(priority).submit(move || {
            if let Ok(mut order) = order.lock() {
                order.push(name.to_string());
            }
        })?;
        println!("Submitted: {} (priority {})", name, priority);
    }

    dispatcher
        .queue_for(priorities::LOW)
        .try_submit(|| Err(anyhow::anyhow!("simulated failure")))?;

    let stats = dispatcher.stats();
    println!(
        "\n{} pending across {} lanes on {} worker(s)",
        stats.total_pending, stats.live_lanes, stats.workers
    );

    release_tx.send(())?;

    // Lowest lane last, so this resolves once everything above has run
    let done = dispatcher
        .queue_for(priorities::BACKGROUND)
        .submit_with_result(|| ())?;
    done.blocking_recv()?;

    println!("\n--- Execution order ---");
    if let Ok(order) = order.lock() {
        for (i, name) in order.iter().enumerate() {
            println!("{}: {}", i, name);
        }
    }

    for failure in dispatcher.failures().list() {
        println!("Failed task {}: {}", failure.task_id, failure.error);
    }

    dispatcher.shutdown();
    println!("\n✓ Done");
    Ok(())
}
