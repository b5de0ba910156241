#![cfg(feature = "os-poll")]

#[macro_use]
mod util;

use std::sync::Arc;
use std::time::Duration;

use iocoro::coro::co_spawn_io;
use iocoro::io_context::IoContext;
use iocoro::timers_compose::{co_sleep, with_timeout, Outcome};

#[test]
fn timeout_wins_over_a_slower_operation() {
    util::init();

    let mut ctx = IoContext::new().unwrap();
    let io = ctx.get_executor().as_io_executor();
    let outcome = Arc::new(std::sync::Mutex::new(None));
    let outcome2 = outcome.clone();

    co_spawn_io(io, async move {
        let result = with_timeout(Duration::from_millis(50), async {
            co_sleep(Duration::from_millis(500)).await.unwrap();
        })
        .await
        .unwrap();
        *outcome2.lock().unwrap() = Some(result);
    });

    ctx.run_for(Duration::from_secs(1)).unwrap();

    assert_eq!(outcome.lock().unwrap().take(), Some(Outcome::TimedOut));
}
