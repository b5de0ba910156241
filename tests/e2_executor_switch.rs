#![cfg(feature = "os-poll")]

#[macro_use]
mod util;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use iocoro::coro::{co_spawn_io, this_coro, switch_to};
use iocoro::executor::ThreadPool;
use iocoro::io_context::IoContext;
use iocoro::timers_compose::co_sleep;

#[test]
fn switching_executor_moves_to_a_different_thread() {
    util::init();

    let mut ctx = IoContext::new().unwrap();
    let io = ctx.get_executor().as_io_executor();
    let pool = ThreadPool::new(1);
    let pool_ex = pool.executor();

    let differed = Arc::new(AtomicBool::new(false));
    let differed2 = differed.clone();
    let slept = Arc::new(AtomicBool::new(false));
    let slept2 = slept.clone();

    co_spawn_io(io.clone(), async move {
        let io_thread = std::thread::current().id();

        switch_to(iocoro::executor::AnyExecutor::new(pool_ex)).await;
        let pool_thread = std::thread::current().id();
        differed2.store(pool_thread != io_thread, Ordering::SeqCst);

        // Spin a little "CPU work" on the pool thread.
        let mut acc: u64 = 0;
        for i in 0..1000 {
            acc = acc.wrapping_add(i);
        }
        std::hint::black_box(acc);

        switch_to(this_coro::io_executor().as_any()).await;
        co_sleep(Duration::from_millis(20)).await.unwrap();
        slept2.store(true, Ordering::SeqCst);
    });

    ctx.run_for(Duration::from_secs(1)).unwrap();
    pool.join();

    assert!(differed.load(Ordering::SeqCst));
    assert!(slept.load(Ordering::SeqCst));
}
