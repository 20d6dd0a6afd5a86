mod common;

use common::{Trace, boot, boot_default};
use nimloth_kernel::config::{KernelConfig, PRI_DEFAULT, PRI_MIN, SchedPolicy};
use nimloth_kernel::sync::{Condvar, Lock, Semaphore};
use std::sync::Arc;

#[test]
fn waiter_donates_to_lock_holder() {
    let tk = boot_default();
    let sched = tk.kernel.sched();
    let lock = Lock::new();
    let trace = Trace::default();
    lock.acquire(sched);

    let (l, t) = (lock.clone(), trace.clone());
    tk.kernel
        .thread_create("high", PRI_DEFAULT + 10, move |k| {
            l.acquire(k.sched());
            t.push("high acquired");
            l.release(k.sched());
        })
        .unwrap();
    assert_eq!(sched.get_priority(), PRI_DEFAULT + 10);

    lock.release(sched);
    trace.push("main released");
    assert_eq!(sched.get_priority(), PRI_DEFAULT);
    assert_eq!(trace.events(), ["high acquired", "main released"]);
}

#[test]
fn donation_follows_the_lock_chain() {
    let tk = boot_default();
    let sched = tk.kernel.sched();
    let a = Lock::new();
    let b = Lock::new();
    let trace = Trace::default();
    a.acquire(sched);

    let (la, lb, t) = (a.clone(), b.clone(), trace.clone());
    tk.kernel
        .thread_create("medium", PRI_DEFAULT + 5, move |k| {
            lb.acquire(k.sched());
            la.acquire(k.sched());
            t.push("medium got a");
            la.release(k.sched());
            lb.release(k.sched());
            t.push("medium done");
        })
        .unwrap();
    assert_eq!(sched.get_priority(), PRI_DEFAULT + 5);

    let (lb, t) = (b.clone(), trace.clone());
    tk.kernel
        .thread_create("high", PRI_DEFAULT + 10, move |k| {
            lb.acquire(k.sched());
            t.push("high got b");
            lb.release(k.sched());
        })
        .unwrap();
    assert_eq!(sched.get_priority(), PRI_DEFAULT + 10);

    a.release(sched);
    assert_eq!(sched.get_priority(), PRI_DEFAULT);
    assert_eq!(
        trace.events(),
        ["medium got a", "high got b", "medium done"]
    );
}

#[test]
fn next_holder_inherits_the_remaining_waiters() {
    let tk = boot_default();
    let sched = tk.kernel.sched();
    let lock = Lock::new();
    let trace = Trace::default();
    lock.acquire(sched);

    let (l, t) = (lock.clone(), trace.clone());
    tk.kernel
        .thread_create("second", PRI_DEFAULT + 4, move |k| {
            l.acquire(k.sched());
            t.push("second got lock");
            l.release(k.sched());
        })
        .unwrap();
    let (l, t) = (lock.clone(), trace.clone());
    tk.kernel
        .thread_create("first", PRI_DEFAULT + 9, move |k| {
            l.acquire(k.sched());
            t.push("first has lock");
            k.sched().set_priority(PRI_MIN);
            t.push(format!("first continues at {}", k.sched().get_priority()));
            l.release(k.sched());
        })
        .unwrap();
    assert_eq!(sched.get_priority(), PRI_DEFAULT + 9);

    lock.release(sched);
    trace.push("main");
    assert_eq!(
        trace.events(),
        [
            "first has lock".to_string(),
            format!("first continues at {}", PRI_DEFAULT + 4),
            "second got lock".to_string(),
            "main".to_string(),
        ]
    );
}

#[test]
fn boosted_holder_is_not_preempted_by_medium_thread() {
    let tk = boot_default();
    let sched = tk.kernel.sched();
    let lock = Lock::new();
    let trace = Trace::default();

    let (l, t) = (lock.clone(), trace.clone());
    tk.kernel
        .thread_create("low", 10, move |k| {
            l.acquire(k.sched());
            let (lh, th) = (l.clone(), t.clone());
            k.thread_create("high", 30, move |k| {
                lh.acquire(k.sched());
                th.push("high");
                lh.release(k.sched());
            })
            .unwrap();
            let tm = t.clone();
            k.thread_create("medium", 20, move |_| tm.push("medium"))
                .unwrap();
            t.push(format!("low at {}", k.sched().get_priority()));
            l.release(k.sched());
            t.push(format!("low done at {}", k.sched().get_priority()));
        })
        .unwrap();
    // main 让出处理器，三个线程都结束后才回来
    sched.set_priority(5);
    assert_eq!(
        trace.events(),
        ["low at 30", "high", "medium", "low done at 10"]
    );
}

#[test]
fn releasing_one_lock_keeps_other_donations() {
    let tk = boot_default();
    let sched = tk.kernel.sched();
    let a = Lock::new();
    let b = Lock::new();
    a.acquire(sched);
    b.acquire(sched);

    for (lock, priority) in [(a.clone(), PRI_DEFAULT + 3), (b.clone(), PRI_DEFAULT + 6)] {
        tk.kernel
            .thread_create("waiter", priority, move |k| {
                lock.acquire(k.sched());
                lock.release(k.sched());
            })
            .unwrap();
    }
    assert_eq!(sched.get_priority(), PRI_DEFAULT + 6);
    b.release(sched);
    assert_eq!(sched.get_priority(), PRI_DEFAULT + 3);
    a.release(sched);
    assert_eq!(sched.get_priority(), PRI_DEFAULT);
}

#[test]
fn donated_priority_survives_lowering_base() {
    let tk = boot_default();
    let sched = tk.kernel.sched();
    let lock = Lock::new();
    lock.acquire(sched);
    let l = lock.clone();
    tk.kernel
        .thread_create("high", PRI_DEFAULT + 4, move |k| {
            l.acquire(k.sched());
            l.release(k.sched());
        })
        .unwrap();
    sched.set_priority(PRI_DEFAULT - 10);
    assert_eq!(sched.get_priority(), PRI_DEFAULT + 4);
    lock.release(sched);
    assert_eq!(sched.get_priority(), PRI_DEFAULT - 10);
}

#[test]
fn mlfqs_does_not_donate() {
    let tk = boot(KernelConfig::default().with_policy(SchedPolicy::Mlfqs));
    let sched = tk.kernel.sched();
    let before = sched.get_priority();
    let lock = Lock::new();
    lock.acquire(sched);
    let l = lock.clone();
    tk.kernel
        .thread_create("waiter", PRI_DEFAULT, move |k| {
            l.acquire(k.sched());
            l.release(k.sched());
        })
        .unwrap();
    sched.yield_now();
    assert_eq!(sched.get_priority(), before);
    lock.release(sched);
}

#[test]
#[should_panic(expected = "does not hold it")]
fn releasing_an_unheld_lock_panics() {
    let tk = boot_default();
    let lock = Lock::new();
    lock.acquire(tk.kernel.sched());
    let l = lock.clone();
    tk.kernel
        .thread_create("thief", PRI_DEFAULT + 1, move |k| l.release(k.sched()))
        .unwrap();
}

#[test]
fn semaphore_wakes_highest_priority_first() {
    let tk = boot_default();
    let sema = Arc::new(Semaphore::new(0));
    let trace = Trace::default();
    for priority in [PRI_DEFAULT + 1, PRI_DEFAULT + 3, PRI_DEFAULT + 2] {
        let (s, t) = (sema.clone(), trace.clone());
        tk.kernel
            .thread_create("waiter", priority, move |k| {
                s.down(k.sched());
                t.push(format!("p{}", priority));
            })
            .unwrap();
    }
    assert_eq!(sema.waiter_count(), 3);
    for _ in 0..3 {
        sema.up(tk.kernel.sched());
    }
    assert_eq!(
        trace.events(),
        [
            format!("p{}", PRI_DEFAULT + 3),
            format!("p{}", PRI_DEFAULT + 2),
            format!("p{}", PRI_DEFAULT + 1),
        ]
    );
    assert_eq!(sema.count(), 0);
}

#[test]
fn condvar_signals_highest_priority_waiter() {
    let tk = boot_default();
    let sched = tk.kernel.sched();
    let lock = Lock::new();
    let cond = Arc::new(Condvar::new());
    let trace = Trace::default();
    for priority in [PRI_DEFAULT + 2, PRI_DEFAULT + 4, PRI_DEFAULT + 3] {
        let (l, c, t) = (lock.clone(), cond.clone(), trace.clone());
        tk.kernel
            .thread_create("waiter", priority, move |k| {
                l.acquire(k.sched());
                c.wait(&l, k.sched());
                t.push(format!("p{}", priority));
                l.release(k.sched());
            })
            .unwrap();
    }
    for _ in 0..3 {
        lock.acquire(sched);
        cond.signal(&lock, sched);
        lock.release(sched);
    }
    assert_eq!(
        trace.events(),
        [
            format!("p{}", PRI_DEFAULT + 4),
            format!("p{}", PRI_DEFAULT + 3),
            format!("p{}", PRI_DEFAULT + 2),
        ]
    );
}
