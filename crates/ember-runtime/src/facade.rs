//! The process-wide runtime: one arena, one layout registry, one scheduler,
//! and the handle tables the C ABI hands out.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ember_value::{Arena, ArenaError, Value};
use once_cell::sync::OnceCell;

use crate::chan::{ChanError, Channel, TryRecvError, TrySendError};
use crate::config::RuntimeConfig;
use crate::decode::{self, DecodeError, Decoded, Format};
use crate::diag::{self, diag};
use crate::metrics::{add, hit, Metrics};
use crate::object::{self, LayoutId, LayoutRegistry, ObjectError, ObjectLayout};
use crate::sched::{Scheduler, TaskHandle, TaskResult};

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Slot table addressed by 1-based handles; 0 is never a valid handle.
pub struct HandleTable<T> {
    slots: Mutex<Vec<Option<T>>>,
}

impl<T: Clone> HandleTable<T> {
    pub fn new() -> Self {
        HandleTable {
            slots: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<T>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, item: T) -> u64 {
        let mut slots = self.lock();
        if let Some(idx) = slots.iter().position(Option::is_none) {
            slots[idx] = Some(item);
            return idx as u64 + 1;
        }
        slots.push(Some(item));
        slots.len() as u64
    }

    pub fn get(&self, handle: u64) -> Option<T> {
        let idx = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.lock().get(idx).cloned().flatten()
    }

    pub fn remove(&self, handle: u64) -> Option<T> {
        let idx = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.lock().get_mut(idx).and_then(Option::take)
    }

    pub fn live(&self) -> usize {
        self.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Clones of every live entry.
    pub fn entries(&self) -> Vec<T> {
        self.lock().iter().flatten().cloned().collect()
    }
}

impl<T: Clone> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("unknown channel handle {0}")]
    UnknownChannel(u64),
    #[error("unknown task handle {0}")]
    UnknownTask(u64),
}

pub struct Runtime {
    config: RuntimeConfig,
    arena: Arena,
    layouts: LayoutRegistry,
    scheduler: Scheduler,
    metrics: Arc<Metrics>,
    tasks: HandleTable<TaskHandle>,
    channels: HandleTable<Channel>,
    shut_down: AtomicBool,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> std::io::Result<Runtime> {
        let metrics = Arc::new(Metrics::default());
        let scheduler = Scheduler::with_metrics(&config, metrics.clone())?;
        Ok(Runtime {
            arena: Arena::with_capacity(config.arena_bytes),
            layouts: LayoutRegistry::new(),
            scheduler,
            metrics,
            tasks: HandleTable::new(),
            channels: HandleTable::new(),
            shut_down: AtomicBool::new(false),
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn layouts(&self) -> &LayoutRegistry {
        &self.layouts
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn alloc(&self, size: usize) -> Result<Value, ArenaError> {
        let r = self.arena.alloc(size)?;
        hit(&self.metrics.allocations);
        add(&self.metrics.alloc_bytes, r.words() as u64 * ember_value::WORD_BYTES as u64);
        Ok(Value::Ref(r))
    }

    pub fn register_layout(&self, layout: ObjectLayout) -> LayoutId {
        self.layouts.register(layout)
    }

    pub fn new_object(&self, id: LayoutId) -> Result<Value, ObjectError> {
        let obj = object::alloc_object(&self.arena, &self.layouts, id)?;
        if let Some(r) = obj.as_ref() {
            hit(&self.metrics.allocations);
            add(&self.metrics.alloc_bytes, r.words() as u64 * ember_value::WORD_BYTES as u64);
        }
        Ok(obj)
    }

    pub fn get_attr(&self, obj: Value, name: &[u8]) -> Result<Value, ObjectError> {
        hit(&self.metrics.attr_lookups);
        let res = object::get_attr_generic(&self.arena, &self.layouts, obj, name);
        if matches!(res, Err(ObjectError::AttributeNotFound { .. })) {
            hit(&self.metrics.attr_misses);
        }
        res
    }

    pub fn set_attr(&self, obj: Value, name: &[u8], value: Value) -> Result<(), ObjectError> {
        hit(&self.metrics.attr_stores);
        object::set_attr_generic(&self.arena, &self.layouts, obj, name, value)
    }

    pub fn decode(&self, format: Format, buf: &[u8]) -> Result<Decoded, DecodeError> {
        hit(&self.metrics.decode_calls);
        let res = decode::decode(format, buf);
        if res.is_err() {
            hit(&self.metrics.decode_failures);
        }
        res
    }

    pub fn spawn<F>(&self, fut: F) -> u64
    where
        F: std::future::Future<Output = TaskResult> + Send + 'static,
    {
        self.tasks.insert(self.scheduler.spawn(fut))
    }

    pub fn task(&self, handle: u64) -> Result<TaskHandle, HandleError> {
        self.tasks.get(handle).ok_or(HandleError::UnknownTask(handle))
    }

    /// Waits for the task and releases its handle.
    pub fn block_on(&self, handle: u64) -> Result<TaskResult, HandleError> {
        let task = self.task(handle)?;
        let out = self.scheduler.block_on(&task);
        self.tasks.remove(handle);
        Ok(out)
    }

    /// Returns at once after shutdown.
    pub fn sleep_ms(&self, ms: u64) {
        let d = std::time::Duration::from_millis(ms);
        let _ = self.scheduler.block_on_future(crate::sched::sleep(d));
    }

    /// Channels created after shutdown start out closed.
    pub fn chan_new(&self, capacity: usize) -> u64 {
        let ch = Channel::with_metrics(capacity, self.metrics.clone());
        if self.is_shut_down() {
            ch.close();
        }
        self.channels.insert(ch)
    }

    pub fn channel(&self, handle: u64) -> Result<Channel, HandleError> {
        self.channels
            .get(handle)
            .ok_or(HandleError::UnknownChannel(handle))
    }

    pub fn chan_send(&self, handle: u64, value: Value) -> Result<Result<(), ChanError>, HandleError> {
        let ch = self.channel(handle)?;
        let res = self
            .scheduler
            .block_on_future(async move { ch.send(value).await })
            .unwrap_or(Err(ChanError::Closed));
        Ok(res)
    }

    pub fn chan_recv(&self, handle: u64) -> Result<Result<Value, ChanError>, HandleError> {
        let ch = self.channel(handle)?;
        let res = self
            .scheduler
            .block_on_future(async move { ch.recv().await })
            .unwrap_or(Err(ChanError::Closed));
        Ok(res)
    }

    pub fn chan_try_send(
        &self,
        handle: u64,
        value: Value,
    ) -> Result<Result<(), TrySendError>, HandleError> {
        Ok(self.channel(handle)?.try_send(value))
    }

    pub fn chan_try_recv(&self, handle: u64) -> Result<Result<Value, TryRecvError>, HandleError> {
        Ok(self.channel(handle)?.try_recv())
    }

    pub fn chan_close(&self, handle: u64) -> Result<bool, HandleError> {
        Ok(self.channel(handle)?.close())
    }

    /// Releases the handle. Clones held by running tasks stay usable.
    pub fn chan_drop(&self, handle: u64) -> Result<(), HandleError> {
        self.channels
            .remove(handle)
            .map(|_| ())
            .ok_or(HandleError::UnknownChannel(handle))
    }

    pub fn dump_profile(&self, out: &mut impl Write) -> std::io::Result<()> {
        self.metrics.dump(out)
    }

    /// Dumps the profile when enabled, closes every channel so blocked
    /// senders and receivers return, and stops the scheduler. Returns false
    /// if the runtime was already shut down.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        let open = self.channels.entries();
        let closed = open.iter().filter(|ch| ch.close()).count();
        if self.config.profile {
            let _ = self.dump_profile(&mut std::io::stderr().lock());
        }
        let arena = self.arena.stats();
        diag!(
            "shutdown: {} allocations, {} of {} arena bytes used, {closed} channels closed",
            arena.allocations,
            arena.used,
            arena.capacity
        );
        self.scheduler.shutdown(self.config.shutdown_timeout);
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

/// Creates the process-wide runtime from the environment. Returns true if
/// this call created it.
pub fn runtime_init() -> std::io::Result<bool> {
    runtime_init_with(RuntimeConfig::from_env())
}

pub fn runtime_init_with(config: RuntimeConfig) -> std::io::Result<bool> {
    if RUNTIME.get().is_some() {
        return Ok(false);
    }
    diag::init(config.debug);
    let workers = config.workers;
    let mut created = false;
    RUNTIME.get_or_try_init(|| {
        created = true;
        Runtime::new(config)
    })?;
    if created {
        diag!("runtime initialized with {workers} workers");
    }
    Ok(created)
}

/// The process-wide runtime, if initialized.
pub fn try_runtime() -> Option<&'static Runtime> {
    RUNTIME.get()
}

/// Shuts the process-wide runtime down. The instance stays reachable so late
/// callers see closed channels and cancelled tasks rather than dangling state.
pub fn runtime_shutdown() -> bool {
    RUNTIME.get().is_some_and(Runtime::shutdown)
}

pub fn print_value(out: &mut impl Write, value: Value) -> std::io::Result<()> {
    writeln!(out, "{value}")
}

pub fn print_newline(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out)
}
