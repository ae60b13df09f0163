//! Main loop example
//!
//! This example demonstrates the cooperative main queue:
//! - 30 default-priority tasks run on pool workers
//! - each one posts a message back to the main queue
//! - the main thread prints every message while ticking
//! - a final task posts a main-queue task that shuts the dispatcher down

use a3s_dispatch::{priorities, Dispatcher};
use std::io::Write;
use std::thread;

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let dispatcher = Dispatcher::new()?;
    let main_thread = thread::current().id();

    for i in 0..30 {
        let main = dispatcher.main_queue();
        dispatcher.queue_for(priorities::DEFAULT).submit(move || {
            assert_ne!(thread::current().id(), main_thread);
            let first = i.to_string();

            let posted = main.submit(move || {
                assert_eq!(thread::current().id(), main_thread);
                let second = (i + 1).to_string();
                println!("{} -> {}", first, second);
            });
            if let Err(e) = posted {
                eprintln!("Failed to post message {}: {}", i, e);
            }
        })?;
    }

    // Same lane as the messages, so it is posted after all of them
    let handle = dispatcher.clone();
    dispatcher.queue_for(priorities::DEFAULT).submit(move || {
        let exit = handle.clone();
        let posted = handle.main_queue().submit(move || {
            println!("exit");
            exit.shutdown();
        });
        if let Err(e) = posted {
            eprintln!("Failed to post exit: {}", e);
        }
    })?;

    dispatcher.run_main_loop(|| {
        print!(".");
        let _ = std::io::stdout().flush();
    });

    Ok(())
}
