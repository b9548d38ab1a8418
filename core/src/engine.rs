//! The engine facade.
//!
//! One [`Engine`] instance owns the full mechanism: the per-domain
//! grace-period controllers, the `{processor -> queues}` registry, the
//! parked (tickless) mask, and the remote-offload set. All state is owned
//! and injected, never ambient, so engines can be instantiated side by side
//! (the test suite builds several).
//!
//! Control flow at a glance:
//!
//! ```text
//!   writer ──enqueue──▶ incoming ─┐
//!                                 │ tick / process_callbacks
//!                                 ▼ (owning processor)
//!                incoming ─▶ current ─▶ done ─▶ invocation
//!                       batch        batch      local drain or
//!                       assigned     complete   remote offload helper
//! ```

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use hashbrown::HashMap;
use spin::{Mutex, RwLock};

use crate::callback::Callback;
use crate::cpumask::CpuSet;
use crate::ctrl::{batch_before, GraceControl, BATCH_SEED};
use crate::domain::{DomainId, DomainSpec, TickFlags};
use crate::error::{Error, Result};
use crate::host::{DeferredWork, HostOps};
use crate::offload::OffloadSet;
use crate::pcpu::{CpuQueues, CpuSlot, DrainOwner};
use crate::stats::{DomainCounters, DomainStats};
use crate::tunables::Tunables;
use crate::MAX_CPUS;

/// Stall-detector bookkeeping, one per domain.
struct StallTrack {
    batch: i64,
    since: u64,
    logged: bool,
}

pub(crate) struct DomainState {
    pub spec: DomainSpec,
    pub ctrl: GraceControl,
    pub counters: DomainCounters,
    stall: Mutex<StallTrack>,
}

/// A deferred-reclamation engine instance.
///
/// See the crate documentation for the overall protocol. All operations
/// except [`Engine::barrier`] and [`Engine::synchronize`] are non-blocking
/// and usable from restricted contexts.
pub struct Engine {
    domains: Vec<DomainState>,
    cpus: RwLock<HashMap<usize, Arc<CpuSlot>>>,
    /// Processors in tickless idle; excluded from batch seeding.
    parked: RwLock<CpuSet>,
    offload: OffloadSet,
    /// Serializes barrier/synchronize callers. Never nested with any other
    /// engine lock.
    pub(crate) barrier_gate: Mutex<()>,
    tunables: Tunables,
    host: Arc<dyn HostOps>,
}

impl Engine {
    /// Build an engine over the given domains.
    pub fn new(specs: Vec<DomainSpec>, tunables: Tunables, host: Arc<dyn HostOps>) -> Result<Self> {
        if specs.is_empty() {
            return Err(Error::NoDomains);
        }
        tunables.validate()?;
        let domains = specs
            .into_iter()
            .map(|spec| DomainState {
                spec,
                ctrl: GraceControl::new(),
                counters: DomainCounters::new(),
                stall: Mutex::new(StallTrack {
                    batch: BATCH_SEED,
                    since: 0,
                    logged: false,
                }),
            })
            .collect();
        Ok(Self {
            domains,
            cpus: RwLock::new(HashMap::new()),
            parked: RwLock::new(CpuSet::new()),
            offload: OffloadSet::new(),
            barrier_gate: Mutex::new(()),
            tunables,
            host,
        })
    }

    /// Build an engine with the conventional two domains:
    /// [`DomainId::NORMAL`] and [`DomainId::SOFTIRQ`].
    pub fn with_default_domains(tunables: Tunables, host: Arc<dyn HostOps>) -> Result<Self> {
        Self::new(
            vec![DomainSpec::normal(), DomainSpec::softirq()],
            tunables,
            host,
        )
    }

    /// Number of domains this engine was built with.
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Number of processors currently online.
    pub fn online_cpus(&self) -> usize {
        self.cpus.read().len()
    }

    pub(crate) fn domain(&self, id: DomainId) -> &DomainState {
        match self.domains.get(id.0) {
            Some(dom) => dom,
            None => panic!("unknown domain {:?}", id),
        }
    }

    pub(crate) fn slot(&self, cpu: usize) -> Option<Arc<CpuSlot>> {
        self.cpus.read().get(&cpu).cloned()
    }

    pub(crate) fn online_mask(&self) -> CpuSet {
        let cpus = self.cpus.read();
        let mut mask = CpuSet::new();
        for cpu in cpus.keys() {
            mask.set(*cpu);
        }
        mask
    }

    /// Processors a new batch must wait on: online and not parked.
    fn eligible(&self) -> CpuSet {
        self.online_mask().and_not(&self.parked.read())
    }

    // ========================================================================
    // Enqueue
    // ========================================================================

    /// Queue a callback for invocation after a grace period.
    ///
    /// Constant-time, non-blocking, never fails. `cpu` must name the online
    /// processor whose execution context is doing the enqueue; naming an
    /// offline processor is a host contract violation and aborts.
    pub fn enqueue<F>(&self, domain: DomainId, cpu: usize, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let dom = self.domain(domain);
        let Some(slot) = self.slot(cpu) else {
            panic!("Grace: enqueue on offline cpu {}", cpu);
        };
        let q = &slot.domains[domain.0];
        q.seqs.lock().incoming.push_back(Callback::new(func));
        let qlen = q.qlen.fetch_add(1, Ordering::AcqRel) + 1;
        DomainCounters::add(&dom.counters.callbacks_enqueued, 1);

        if qlen > self.tunables.high_water {
            if q.budget.swap(usize::MAX, Ordering::AcqRel) != usize::MAX {
                DomainCounters::add(&dom.counters.overload_raises, 1);
                log::debug!(
                    "Grace: {} cpu {} over high water ({} queued), budget unbounded",
                    dom.spec.name,
                    cpu,
                    qlen
                );
            }
            self.force_quiescent_state(dom, q, cpu, qlen);
        }
    }

    /// Accelerate quiescent-state detection under overload: hint the local
    /// processor, and (rate-limited per queue) every processor still owing
    /// a quiescent state for the active batch.
    fn force_quiescent_state(&self, dom: &DomainState, q: &CpuQueues, cpu: usize, qlen: usize) {
        self.host.reschedule_hint(cpu);
        let last = q.last_hint_qlen.load(Ordering::Relaxed);
        if qlen.saturating_sub(last) > self.tunables.hint_interval {
            q.last_hint_qlen.store(qlen, Ordering::Relaxed);
            let mut pending = dom.ctrl.pending_snapshot();
            pending.clear(cpu);
            for target in pending.iter() {
                self.host.reschedule_hint(target);
            }
        }
    }

    // ========================================================================
    // Tick and quiescent-state detection
    // ========================================================================

    /// Periodic tick entry point, invoked by the host once per processor
    /// per interval. `flags` describe the interrupted context; `now` is the
    /// host's tick counter. The sole driver of quiescent-state detection.
    pub fn tick(&self, cpu: usize, flags: TickFlags, now: u64) {
        let divisor = self.tunables.tick_divisor;
        if divisor != 0 && now.wrapping_sub(cpu as u64) & divisor != 0 {
            return;
        }
        let Some(slot) = self.slot(cpu) else {
            return;
        };
        for (idx, dom) in self.domains.iter().enumerate() {
            if dom.spec.policy.permits(flags) {
                slot.domains[idx].qs_passed.store(true, Ordering::Release);
            }
            self.check_stall(dom, now);
        }
        self.host.queue_work(cpu, DeferredWork::ProcessCallbacks);
    }

    /// Diagnostic-only stall detector: one warning per batch that outlives
    /// the configured threshold. Never aborts.
    fn check_stall(&self, dom: &DomainState, now: u64) {
        let threshold = self.tunables.stall_ticks;
        if threshold == 0 || !dom.ctrl.batch_active() {
            return;
        }
        let cur = dom.ctrl.current_batch();
        let mut stall = dom.stall.lock();
        if stall.batch != cur {
            stall.batch = cur;
            stall.since = now;
            stall.logged = false;
            return;
        }
        if !stall.logged && now.wrapping_sub(stall.since) >= threshold {
            stall.logged = true;
            log::warn!(
                "Grace: {} batch {} stalled for {} ticks, waiting on {:?}",
                dom.spec.name,
                cur,
                now.wrapping_sub(stall.since),
                dom.ctrl.pending_snapshot()
            );
        }
    }

    /// Is there immediate engine work for `cpu`? Also the poll point that
    /// schedules remote-offload work on helper processors.
    pub fn pending(&self, cpu: usize) -> bool {
        if self.offload.any_designated() && !self.offload.is_designated(cpu) {
            self.host.queue_work(cpu, DeferredWork::ProcessRemote);
        }
        let Some(slot) = self.slot(cpu) else {
            return false;
        };
        self.domains
            .iter()
            .enumerate()
            .any(|(idx, dom)| Self::domain_pending(dom, &slot.domains[idx]))
    }

    fn domain_pending(dom: &DomainState, q: &CpuQueues) -> bool {
        {
            let seqs = q.seqs.lock();
            // Submitted records whose grace period has completed.
            if !seqs.current.is_empty()
                && !batch_before(dom.ctrl.completed_batch(), seqs.assigned_batch)
            {
                return true;
            }
            // New records awaiting batch assignment.
            if seqs.current.is_empty() && !seqs.incoming.is_empty() {
                return true;
            }
        }
        if !q.done.lock().is_empty() {
            return true;
        }
        // The controller waits on a quiescent state from this processor.
        q.seen_batch.load(Ordering::Acquire) != dom.ctrl.current_batch()
            || q.qs_owed.load(Ordering::Acquire)
    }

    /// Will `cpu` need engine work in the future, even if none is immediate?
    /// Hosts use this to veto entering tickless idle.
    pub fn needs_cpu(&self, cpu: usize) -> bool {
        let Some(slot) = self.slot(cpu) else {
            return false;
        };
        let in_flight = slot
            .domains
            .iter()
            .any(|q| !q.seqs.lock().current.is_empty());
        in_flight || self.pending(cpu)
    }

    // ========================================================================
    // Deferred-work bodies
    // ========================================================================

    /// The deferred-work body posted by [`Engine::tick`]: per domain, runs
    /// sequence promotion, quiescent-state reporting, and the local drain.
    /// Must run on `cpu`'s own execution context.
    pub fn process_callbacks(&self, cpu: usize) {
        let Some(slot) = self.slot(cpu) else {
            return;
        };
        for (idx, dom) in self.domains.iter().enumerate() {
            self.process_domain(dom, &slot, idx);
        }
    }

    fn process_domain(&self, dom: &DomainState, slot: &CpuSlot, idx: usize) {
        let cpu = slot.cpu;
        let q = &slot.domains[idx];

        // Sequence promotion and quiescence reporting are independent
        // tracks: this processor promotes its own records by one batch
        // number while possibly reporting on a different one that other
        // processors are waiting for.
        let needs_start = {
            let mut seqs = q.seqs.lock();
            if !seqs.current.is_empty()
                && !batch_before(dom.ctrl.completed_batch(), seqs.assigned_batch)
            {
                let mut ready = seqs.current.take_all();
                q.done.lock().append(&mut ready);
            }
            if seqs.current.is_empty() && !seqs.incoming.is_empty() {
                let fresh = seqs.incoming.take_all();
                seqs.current = fresh;
                seqs.assigned_batch = dom.ctrl.current_batch().wrapping_add(1);
                true
            } else {
                false
            }
        };
        if needs_start {
            dom.ctrl.request_batch(&self.eligible());
        }

        self.check_quiescent_state(dom, q, cpu);

        if self.offload.any_designated() && self.offload.is_designated(cpu) {
            // Invocation for this queue happens on a helper processor.
            return;
        }
        if !q.done.lock().is_empty() && q.try_claim_drain(DrainOwner::Local) {
            self.do_batch(dom, q, cpu);
            q.release_drain(DrainOwner::Local);
        }
    }

    /// The detector state machine, run on the owning processor.
    fn check_quiescent_state(&self, dom: &DomainState, q: &CpuQueues, cpu: usize) {
        let cur = dom.ctrl.current_batch();
        if q.seen_batch.load(Ordering::Acquire) != cur {
            // A new batch began since this processor last looked. Adopt it;
            // only a quiescent point after this moment counts.
            q.qs_owed.store(true, Ordering::Relaxed);
            q.qs_passed.store(false, Ordering::Relaxed);
            q.seen_batch.store(cur, Ordering::Release);
            return;
        }
        if !q.qs_owed.load(Ordering::Acquire) {
            return;
        }
        if !q.qs_passed.load(Ordering::Acquire) {
            return;
        }
        q.qs_owed.store(false, Ordering::Release);
        // Report under the controller lock, re-checking that the batch has
        // not advanced between the steps above.
        dom.ctrl.quiesce_if_current(cpu, cur, &self.eligible());
    }

    /// Invoke completed callbacks from the front of `done`, up to the
    /// queue's budget, outside every engine lock.
    fn do_batch(&self, dom: &DomainState, q: &CpuQueues, cpu: usize) {
        let budget = q.budget.load(Ordering::Acquire);
        let ready = q.done.lock().detach_front(budget);
        let count = ready.len();
        for cb in ready {
            cb.invoke();
        }
        if count > 0 {
            q.qlen.fetch_sub(count, Ordering::AcqRel);
            DomainCounters::add(&dom.counters.callbacks_invoked, count as u64);
        }
        if q.budget.load(Ordering::Acquire) == usize::MAX
            && q.qlen.load(Ordering::Acquire) <= self.tunables.low_water
        {
            q.budget.store(self.tunables.invoke_budget, Ordering::Release);
            log::debug!("Grace: {} cpu {} overload cleared", dom.spec.name, cpu);
        }
        if !q.done.lock().is_empty() {
            // Budget exhausted with work remaining; repost rather than
            // starving other deferred work.
            self.host.queue_work(cpu, DeferredWork::ProcessCallbacks);
        }
    }

    // ========================================================================
    // Remote offload
    // ========================================================================

    /// Drain one designated processor's `done` sequences on behalf of the
    /// offload scheme. Runs on non-designated helper processors only; a
    /// contended queue is skipped this round, never waited on.
    pub fn process_remote_callbacks(&self, cpu: usize) {
        if self.offload.is_designated(cpu) {
            return;
        }
        let online = self.online_mask();
        let Some(target) = self.offload.next_target(&online) else {
            return;
        };
        let Some(slot) = self.slot(target) else {
            return;
        };
        for (idx, dom) in self.domains.iter().enumerate() {
            let q = &slot.domains[idx];
            // The guard drops before invocation: hold the done lock only
            // long enough to detach the list.
            let detached = match q.done.try_lock() {
                Some(mut done) if q.try_claim_drain(DrainOwner::Remote) => Some(done.take_all()),
                _ => None,
            };
            let Some(ready) = detached else {
                continue;
            };
            let count = ready.len();
            for cb in ready {
                cb.invoke();
            }
            if count > 0 {
                q.qlen.fetch_sub(count, Ordering::AcqRel);
                DomainCounters::add(&dom.counters.remote_drains, 1);
                DomainCounters::add(&dom.counters.callbacks_invoked, count as u64);
            }
            q.release_drain(DrainOwner::Remote);
        }
    }

    /// Opt `cpu` in or out of designated (remotely drained) status.
    pub fn set_remote_offload(&self, cpu: usize, designated: bool) -> Result<()> {
        if self.slot(cpu).is_none() {
            return Err(Error::CpuNotOnline);
        }
        self.offload.set(cpu, designated);
        log::info!(
            "Offload: cpu {} {}",
            cpu,
            if designated { "designated" } else { "cleared" }
        );
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bring a processor online: allocate its queues, seeding each domain's
    /// `seen_batch` from the completed batch so it is never asked to
    /// retroactively quiesce.
    pub fn cpu_online(&self, cpu: usize) -> Result<()> {
        if cpu >= MAX_CPUS {
            return Err(Error::CpuOutOfRange);
        }
        let mut cpus = self.cpus.write();
        if cpus.contains_key(&cpu) {
            return Err(Error::CpuAlreadyOnline);
        }
        let slot = Arc::new(CpuSlot::new(
            cpu,
            self.domains.iter().map(|d| &d.ctrl),
            self.tunables.invoke_budget,
        ));
        cpus.insert(cpu, slot);
        drop(cpus);
        log::info!("Lifecycle: cpu {} online", cpu);
        Ok(())
    }

    /// Take a processor offline: discharge its quiescence obligation so no
    /// batch waits on it, then migrate all of its queued records onto the
    /// lowest-id survivor's `incoming` sequence (concatenation; order
    /// across processors was never promised).
    pub fn cpu_offline(&self, cpu: usize) -> Result<()> {
        let slot = self.cpus.write().remove(&cpu).ok_or(Error::CpuNotOnline)?;
        self.parked.write().clear(cpu);
        self.offload.set(cpu, false);
        self.host.cancel_work(cpu);

        let survivor = self.online_mask().first_set().and_then(|id| self.slot(id));
        for (idx, dom) in self.domains.iter().enumerate() {
            dom.ctrl.quiesce_departing(cpu, &self.eligible());

            let q = &slot.domains[idx];
            // Oldest records first: done, then current, then incoming.
            let mut moved = q.done.lock().take_all();
            {
                let mut seqs = q.seqs.lock();
                let mut current = seqs.current.take_all();
                moved.append(&mut current);
                let mut incoming = seqs.incoming.take_all();
                moved.append(&mut incoming);
            }
            let count = moved.len();
            if count == 0 {
                continue;
            }
            q.qlen.fetch_sub(count, Ordering::AcqRel);
            match &survivor {
                Some(dest) => {
                    let dq = &dest.domains[idx];
                    dq.seqs.lock().incoming.append(&mut moved);
                    dq.qlen.fetch_add(count, Ordering::AcqRel);
                    DomainCounters::add(&dom.counters.records_migrated, count as u64);
                    log::info!(
                        "Lifecycle: migrated {} {} records from cpu {} to cpu {}",
                        count,
                        dom.spec.name,
                        cpu,
                        dest.cpu
                    );
                }
                None => {
                    // Last processor out. Every peer quiesced by going
                    // offline and the caller's context is the final
                    // quiescent point, so inline invocation is safe.
                    for cb in moved {
                        cb.invoke();
                    }
                    DomainCounters::add(&dom.counters.callbacks_invoked, count as u64);
                    log::info!(
                        "Lifecycle: cpu {} was last online, invoked {} {} records inline",
                        cpu,
                        count,
                        dom.spec.name
                    );
                }
            }
        }
        log::info!("Lifecycle: cpu {} offline", cpu);
        Ok(())
    }

    /// Mark `cpu` as entering tickless idle. Parking is itself a quiescent
    /// point, so any outstanding obligation is discharged immediately;
    /// batches started while parked exclude this processor entirely.
    pub fn enter_tickless(&self, cpu: usize) -> Result<()> {
        if self.slot(cpu).is_none() {
            return Err(Error::CpuNotOnline);
        }
        self.parked.write().set(cpu);
        let eligible = self.eligible();
        for dom in &self.domains {
            dom.ctrl.quiesce_departing(cpu, &eligible);
        }
        log::debug!("Lifecycle: cpu {} parked", cpu);
        Ok(())
    }

    /// Mark `cpu` as leaving tickless idle, re-seeding its view of each
    /// domain from the completed batch (it is never asked to quiesce for
    /// batches it could not have observed while parked).
    pub fn leave_tickless(&self, cpu: usize) -> Result<()> {
        let Some(slot) = self.slot(cpu) else {
            return Err(Error::CpuNotOnline);
        };
        self.parked.write().clear(cpu);
        for (idx, dom) in self.domains.iter().enumerate() {
            let q = &slot.domains[idx];
            q.seen_batch
                .store(dom.ctrl.completed_batch(), Ordering::Release);
            q.qs_owed.store(false, Ordering::Relaxed);
            q.qs_passed.store(false, Ordering::Relaxed);
        }
        log::debug!("Lifecycle: cpu {} unparked", cpu);
        Ok(())
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Monotonically non-decreasing completed-batch counter for `domain`.
    pub fn batches_completed(&self, domain: DomainId) -> i64 {
        self.domain(domain).ctrl.completed_batch()
    }

    /// Snapshot of `domain`'s diagnostic counters.
    pub fn stats(&self, domain: DomainId) -> DomainStats {
        let dom = self.domain(domain);
        let started = dom.ctrl.current_batch().wrapping_sub(BATCH_SEED) as u64;
        let completed = dom.ctrl.completed_batch().wrapping_sub(BATCH_SEED) as u64;
        dom.counters.snapshot(started, completed)
    }
}
