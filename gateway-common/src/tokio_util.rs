// Thin wrapper around tokio::spawn that names tasks for logging and turns a
// panic inside a cooperative loop into a log line instead of a silent task
// death (§5 "Scheduling model": the core is a handful of long-lived tasks,
// each of which must keep running even if one tick panics).

use futures::FutureExt;
use std::future::Future;

pub fn spawn_task<F>(name: &'static str, future: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let result = std::panic::AssertUnwindSafe(future)
            .catch_unwind()
            .await;
        if let Err(panic) = result {
            log::error!("task '{name}' panicked: {}", panic_message(&panic));
        }
    })
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
