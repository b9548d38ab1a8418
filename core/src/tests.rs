//! Multi-processor scenario tests.
//!
//! The engine is driven by hand: a "round" is one tick plus one deferred
//! work pass per processor, which is exactly what the host's timer and
//! softirq layers would do. Batch numbers start at -300, so a fresh engine
//! needs three rounds end to end: one to assign a batch, one for every
//! processor to report quiescence, one to promote and drain.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use spin::Mutex;

use crate::{
    DeferredWork, DomainId, Engine, Error, HostOps, NullHost, TickFlags, Tunables, MAX_CPUS,
};

fn engine_with(cpus: usize, tunables: Tunables) -> Arc<Engine> {
    let engine = Arc::new(Engine::with_default_domains(tunables, Arc::new(NullHost)).unwrap());
    for cpu in 0..cpus {
        engine.cpu_online(cpu).unwrap();
    }
    engine
}

fn engine(cpus: usize) -> Arc<Engine> {
    engine_with(cpus, Tunables::default())
}

/// One detection round: tick plus deferred-work body on each processor.
fn round(engine: &Engine, cpus: &[usize], flags: TickFlags, now: u64) {
    for &cpu in cpus {
        engine.tick(cpu, flags, now);
        engine.process_callbacks(cpu);
    }
}

fn drive(engine: &Engine, cpus: &[usize], rounds: usize) {
    for r in 0..rounds {
        round(engine, cpus, TickFlags::USER_MODE, r as u64);
    }
}

fn probe(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
    let counter = Arc::clone(counter);
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Safety and FIFO
// ============================================================================

#[test]
fn test_callback_waits_for_every_online_cpu() {
    let engine = engine(2);
    let hits = Arc::new(AtomicUsize::new(0));
    engine.enqueue(DomainId::NORMAL, 0, probe(&hits));

    // However long cpu 0 spins on its own, the grace period cannot end
    // while cpu 1 has not passed a quiescent point.
    drive(&engine, &[0], 6);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    drive(&engine, &[0, 1], 3);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fifo_order_per_processor() {
    let engine = engine(2);
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..10 {
        let order = Arc::clone(&order);
        engine.enqueue(DomainId::NORMAL, 0, move || order.lock().push(i));
    }
    drive(&engine, &[0, 1], 6);
    assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_liveness_all_invoked_within_bounded_rounds() {
    let engine = engine(3);
    let hits = Arc::new(AtomicUsize::new(0));
    for cpu in 0..3 {
        for _ in 0..10 {
            engine.enqueue(DomainId::NORMAL, cpu, probe(&hits));
        }
    }
    drive(&engine, &[0, 1, 2], 10);
    assert_eq!(hits.load(Ordering::SeqCst), 30);

    let stats = engine.stats(DomainId::NORMAL);
    assert_eq!(stats.callbacks_enqueued, 30);
    assert_eq!(stats.callbacks_invoked, 30);
    assert!(stats.batches_completed >= 1);
}

#[test]
fn test_reentrant_enqueue_from_callback() {
    let engine = engine(1);
    let hits = Arc::new(AtomicUsize::new(0));
    let inner = probe(&hits);
    {
        let engine = Arc::clone(&engine);
        let hits = Arc::clone(&hits);
        engine.clone().enqueue(DomainId::NORMAL, 0, move || {
            hits.fetch_add(1, Ordering::SeqCst);
            engine.enqueue(DomainId::NORMAL, 0, inner);
        });
    }
    drive(&engine, &[0], 8);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Batch accounting
// ============================================================================

#[test]
fn test_concurrent_requests_queue_one_follow_up_batch() {
    let engine = engine(3);
    let hits = Arc::new(AtomicUsize::new(0));
    for cpu in 0..3 {
        engine.enqueue(DomainId::NORMAL, cpu, probe(&hits));
    }
    // All three processors request a batch in the first round; the first
    // request starts one, the rest coalesce into a single follow-up.
    drive(&engine, &[0, 1, 2], 8);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(engine.stats(DomainId::NORMAL).batches_started, 2);
}

#[test]
fn test_batches_completed_is_monotonic() {
    let engine = engine(1);
    let before = engine.batches_completed(DomainId::NORMAL);
    engine.enqueue(DomainId::NORMAL, 0, || {});
    drive(&engine, &[0], 4);
    let after = engine.batches_completed(DomainId::NORMAL);
    assert!(after > before);
}

// ============================================================================
// Barrier and synchronize
// ============================================================================

#[test]
fn test_barrier_covers_callbacks_enqueued_before_any_tick() {
    let engine = engine(3);
    let hits = Arc::new(AtomicUsize::new(0));
    for (cpu, n) in [(0usize, 2usize), (1, 2), (2, 1)] {
        for _ in 0..n {
            engine.enqueue(DomainId::NORMAL, cpu, probe(&hits));
        }
    }

    let waiter = {
        let engine = Arc::clone(&engine);
        let hits = Arc::clone(&hits);
        thread::spawn(move || {
            engine.barrier(DomainId::NORMAL);
            // Observed the instant barrier() returned.
            hits.load(Ordering::SeqCst)
        })
    };

    let mut now = 0;
    while !waiter.is_finished() {
        round(&engine, &[0, 1, 2], TickFlags::USER_MODE, now);
        now += 1;
        assert!(now < 10_000, "barrier did not release");
        thread::yield_now();
    }
    assert_eq!(waiter.join().unwrap(), 5);
}

#[test]
fn test_synchronize_waits_a_full_grace_period() {
    let engine = engine(2);
    let waiter = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.synchronize(DomainId::NORMAL))
    };
    let mut now = 0;
    while !waiter.is_finished() {
        round(&engine, &[0, 1], TickFlags::USER_MODE, now);
        now += 1;
        assert!(now < 10_000, "synchronize did not release");
        thread::yield_now();
    }
    waiter.join().unwrap();
}

// ============================================================================
// Hotplug
// ============================================================================

#[test]
fn test_offline_migrates_callbacks_exactly_once() {
    let engine = engine(3);
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        engine.enqueue(DomainId::NORMAL, 2, probe(&hits));
    }
    // No tick has run on cpu 2; its records sit in `incoming`.
    engine.cpu_offline(2).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    drive(&engine, &[0, 1], 6);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(engine.stats(DomainId::NORMAL).records_migrated, 3);
}

#[test]
fn test_offline_mid_grace_period_unblocks_batch() {
    let engine = engine(2);
    let hits = Arc::new(AtomicUsize::new(0));
    engine.enqueue(DomainId::NORMAL, 0, probe(&hits));

    // Start the batch and let cpu 0 quiesce; cpu 1 still owes.
    drive(&engine, &[0], 2);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    engine.cpu_offline(1).unwrap();
    drive(&engine, &[0], 3);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_offline_last_cpu_invokes_inline() {
    let engine = engine(1);
    let hits = Arc::new(AtomicUsize::new(0));
    engine.enqueue(DomainId::NORMAL, 0, probe(&hits));
    engine.enqueue(DomainId::SOFTIRQ, 0, probe(&hits));
    engine.cpu_offline(0).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(engine.online_cpus(), 0);
}

#[test]
fn test_lifecycle_errors() {
    let engine = engine(1);
    assert_eq!(engine.cpu_online(0), Err(Error::CpuAlreadyOnline));
    assert_eq!(engine.cpu_online(MAX_CPUS), Err(Error::CpuOutOfRange));
    assert_eq!(engine.cpu_offline(7), Err(Error::CpuNotOnline));
    assert_eq!(engine.set_remote_offload(7, true), Err(Error::CpuNotOnline));
    assert_eq!(engine.enter_tickless(7), Err(Error::CpuNotOnline));

    let no_domains = Engine::new(vec![], Tunables::default(), Arc::new(NullHost));
    assert!(matches!(no_domains, Err(Error::NoDomains)));
}

// ============================================================================
// Overload throttling
// ============================================================================

#[test]
fn test_overload_unbounds_budget_until_low_water() {
    let tunables = Tunables::default()
        .with_invoke_budget(2)
        .with_high_water(5)
        .with_low_water(2);
    let engine = engine_with(1, tunables);
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..7 {
        engine.enqueue(DomainId::NORMAL, 0, probe(&hits));
    }
    assert_eq!(engine.stats(DomainId::NORMAL).overload_raises, 1);

    // Round 0 assigns the batch, round 1 completes it.
    drive(&engine, &[0], 2);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    // One drain pass moves all 7, well past the default budget of 2.
    round(&engine, &[0], TickFlags::USER_MODE, 2);
    assert_eq!(hits.load(Ordering::SeqCst), 7);

    // Below low water the default budget is back: the next grace period's
    // drain stops at 2 per pass.
    for _ in 0..3 {
        engine.enqueue(DomainId::NORMAL, 0, probe(&hits));
    }
    drive(&engine, &[0], 2);
    round(&engine, &[0], TickFlags::USER_MODE, 5);
    assert_eq!(hits.load(Ordering::SeqCst), 9);
    round(&engine, &[0], TickFlags::USER_MODE, 6);
    assert_eq!(hits.load(Ordering::SeqCst), 10);
}

// ============================================================================
// Remote offload
// ============================================================================

#[test]
fn test_designated_cpu_drained_by_helper() {
    let engine = engine(3);
    engine.set_remote_offload(1, true).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    engine.enqueue(DomainId::NORMAL, 1, probe(&hits));

    // The grace period completes, but cpu 1 never invokes its own done
    // records while designated.
    drive(&engine, &[0, 1, 2], 6);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // A designated processor running the helper path is a no-op.
    engine.process_remote_callbacks(1);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    engine.process_remote_callbacks(0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats(DomainId::NORMAL).remote_drains, 1);
}

#[test]
fn test_clearing_offload_restores_local_drain() {
    let engine = engine(2);
    engine.set_remote_offload(1, true).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    engine.enqueue(DomainId::NORMAL, 1, probe(&hits));
    drive(&engine, &[0, 1], 6);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    engine.set_remote_offload(1, false).unwrap();
    drive(&engine, &[0, 1], 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Tickless parking
// ============================================================================

#[test]
fn test_parked_cpu_excluded_from_new_batches() {
    let engine = engine(2);
    engine.enter_tickless(1).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    engine.enqueue(DomainId::NORMAL, 0, probe(&hits));
    // Only cpu 0 ticks, and that is enough: the batch never seeded cpu 1.
    drive(&engine, &[0], 4);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    engine.leave_tickless(1).unwrap();
    engine.enqueue(DomainId::NORMAL, 0, probe(&hits));
    drive(&engine, &[0], 6);
    // Once unparked, cpu 1 owes quiescent states again.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    drive(&engine, &[0, 1], 3);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn test_parking_discharges_outstanding_obligation() {
    let engine = engine(2);
    let hits = Arc::new(AtomicUsize::new(0));
    engine.enqueue(DomainId::NORMAL, 0, probe(&hits));

    // Batch is active and waiting on cpu 1 when it parks.
    drive(&engine, &[0], 2);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    engine.enter_tickless(1).unwrap();
    drive(&engine, &[0], 2);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Domains
// ============================================================================

#[test]
fn test_domains_quiesce_independently() {
    let engine = engine(1);
    let normal_hits = Arc::new(AtomicUsize::new(0));
    let softirq_hits = Arc::new(AtomicUsize::new(0));
    engine.enqueue(DomainId::NORMAL, 0, probe(&normal_hits));
    engine.enqueue(DomainId::SOFTIRQ, 0, probe(&softirq_hits));

    // Kernel-context ticks outside softirq quiesce only the softirq-class
    // domain.
    for now in 0..6 {
        round(&engine, &[0], TickFlags::empty(), now);
    }
    assert_eq!(softirq_hits.load(Ordering::SeqCst), 1);
    assert_eq!(normal_hits.load(Ordering::SeqCst), 0);

    // User-mode ticks quiesce both.
    drive(&engine, &[0], 4);
    assert_eq!(normal_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_softirq_context_quiesces_neither_domain() {
    let engine = engine(1);
    let hits = Arc::new(AtomicUsize::new(0));
    engine.enqueue(DomainId::SOFTIRQ, 0, probe(&hits));
    for now in 0..6 {
        round(&engine, &[0], TickFlags::IN_SOFTIRQ, now);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Host integration
// ============================================================================

#[derive(Default)]
struct RecordingHost {
    work: Mutex<Vec<(usize, DeferredWork)>>,
    hints: Mutex<Vec<usize>>,
    cancelled: Mutex<Vec<usize>>,
}

impl HostOps for RecordingHost {
    fn queue_work(&self, cpu: usize, work: DeferredWork) {
        self.work.lock().push((cpu, work));
    }

    fn cancel_work(&self, cpu: usize) {
        self.cancelled.lock().push(cpu);
    }

    fn reschedule_hint(&self, cpu: usize) {
        self.hints.lock().push(cpu);
    }
}

#[test]
fn test_tick_posts_deferred_work() {
    let host = Arc::new(RecordingHost::default());
    let engine = Engine::with_default_domains(Tunables::default(), host.clone()).unwrap();
    engine.cpu_online(0).unwrap();
    engine.tick(0, TickFlags::USER_MODE, 0);
    assert_eq!(*host.work.lock(), [(0, DeferredWork::ProcessCallbacks)]);
}

#[test]
fn test_tick_divisor_gates_processing() {
    let host = Arc::new(RecordingHost::default());
    let tunables = Tunables::default().with_tick_divisor(1);
    let engine = Engine::with_default_domains(tunables, host.clone()).unwrap();
    engine.cpu_online(0).unwrap();

    // (now - cpu) & divisor != 0: this tick is skipped entirely.
    engine.tick(0, TickFlags::USER_MODE, 1);
    assert!(host.work.lock().is_empty());

    engine.tick(0, TickFlags::USER_MODE, 2);
    assert_eq!(*host.work.lock(), [(0, DeferredWork::ProcessCallbacks)]);
}

#[test]
fn test_overload_hints_pending_processors() {
    let tunables = Tunables::default()
        .with_high_water(3)
        .with_low_water(1)
        .with_hint_interval(1);
    let host = Arc::new(RecordingHost::default());
    let engine = Engine::with_default_domains(tunables, host.clone()).unwrap();
    for cpu in 0..3 {
        engine.cpu_online(cpu).unwrap();
    }

    // Get a batch active with all three processors pending.
    engine.enqueue(DomainId::NORMAL, 0, || {});
    engine.process_callbacks(0);

    for _ in 0..6 {
        engine.enqueue(DomainId::NORMAL, 0, || {});
    }
    let hints = host.hints.lock();
    // The overloaded processor hints itself on every crossing, and the
    // rate-limited broadcast reaches the other pending processors.
    assert!(hints.contains(&0));
    assert!(hints.contains(&1));
    assert!(hints.contains(&2));
}

#[test]
fn test_pending_schedules_remote_work_for_helpers() {
    let host = Arc::new(RecordingHost::default());
    let engine = Engine::with_default_domains(Tunables::default(), host.clone()).unwrap();
    engine.cpu_online(0).unwrap();
    engine.cpu_online(1).unwrap();
    engine.set_remote_offload(1, true).unwrap();

    assert!(!engine.pending(0));
    assert_eq!(*host.work.lock(), [(0, DeferredWork::ProcessRemote)]);

    // Designated processors never get helper work.
    host.work.lock().clear();
    engine.pending(1);
    assert!(host.work.lock().is_empty());
}

#[test]
fn test_offline_cancels_deferred_work() {
    let host = Arc::new(RecordingHost::default());
    let engine = Engine::with_default_domains(Tunables::default(), host.clone()).unwrap();
    engine.cpu_online(0).unwrap();
    engine.cpu_online(1).unwrap();
    engine.cpu_offline(1).unwrap();
    assert_eq!(*host.cancelled.lock(), [1]);
}

// ============================================================================
// Host-facing queries
// ============================================================================

#[test]
fn test_pending_and_needs_cpu_track_queue_state() {
    let engine = engine(1);
    assert!(!engine.pending(0));
    assert!(!engine.needs_cpu(0));

    engine.enqueue(DomainId::NORMAL, 0, || {});
    assert!(engine.pending(0));
    assert!(engine.needs_cpu(0));

    // Mid grace period: nothing invocable yet, but the cpu is still needed
    // for its in-flight current list.
    round(&engine, &[0], TickFlags::USER_MODE, 0);
    assert!(engine.needs_cpu(0));

    drive(&engine, &[0], 4);
    assert!(!engine.pending(0));
    assert!(!engine.needs_cpu(0));
}

#[test]
#[should_panic(expected = "offline cpu")]
fn test_enqueue_on_offline_cpu_aborts() {
    let engine = engine(1);
    engine.enqueue(DomainId::NORMAL, 3, || {});
}
