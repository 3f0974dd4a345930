// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements kernel threads: their control blocks, their lifecycle,
//! and the per-tick accounting that drives scheduling decisions.
//!
//! ## The thread page
//!
//! Every thread owns exactly one kernel page. The [`Thread`] control
//! block sits at the base of the page and the thread's stack grows
//! downward from the top of the same page, so a stack that grows too
//! far destroys the control block. Destruction is detected lazily:
//! the `magic` member, which sits at the control block's highest
//! address, is checked against [`THREAD_MAGIC`] every time
//! [`current`] runs.
//!
//! The one exception is the initial thread, which adopts the boot
//! context: it gets a control block of its own but keeps the stack
//! the kernel booted on, and is never freed by the scheduler.
//!
//! ## Lifecycle
//!
//! A thread is created blocked, and unblocked by its creator. From
//! then on it moves between [`State::Ready`], [`State::Running`] and
//! [`State::Blocked`] until it calls [`exit`] (or returns from its
//! body, which is the same thing) and becomes [`State::Dying`]. Its
//! page is freed by the *next* thread to be scheduled: a thread that
//! freed its own page would pull its stack out from under itself.

pub(crate) mod mlfqs;
pub(crate) mod scheduler;
mod switch;

use crate::interrupts;
use crate::interrupts::IntrCell;
use crate::memory;
use crate::multitasking::cpu_local;
use crate::multitasking::process;
use crate::multitasking::sync::{Lock, Semaphore};
use crate::time;
use core::cell::{Cell, UnsafeCell};
use core::fmt;
use core::ptr;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use crossbeam::atomic::AtomicCell;
use fixedpoint::Fixed;
use intrusive_list::{container_of, Link, List};
use std::boxed::Box;
use std::sync::Arc;

/// The lowest priority a thread can have.
///
pub const PRI_MIN: i32 = 0;

/// The priority given to the initial thread, and the
/// natural default for new threads.
///
pub const PRI_DEFAULT: i32 = 31;

/// The highest priority a thread can have.
///
pub const PRI_MAX: i32 = 63;

/// The lowest niceness a thread can have. A negative
/// niceness makes the MLFQS treat the thread better.
///
pub const NICE_MIN: i32 = -20;

/// The niceness of the initial thread.
///
pub const NICE_INIT: i32 = 0;

/// The highest niceness a thread can have.
///
pub const NICE_MAX: i32 = 20;

/// The maximum length of a thread's name in bytes.
///
pub const THREAD_NAME_LEN: usize = 16;

/// The exit status recorded for a thread that never
/// reported one.
///
pub const EXIT_FAILURE: i32 = -1;

/// The value of every live thread's `magic` member. A
/// thread whose magic has any other value has overflowed
/// its stack into its control block.
///
const THREAD_MAGIC: u64 = 0x51c3_77ab_90de_44c1;

/// The list of every live thread, from initialisation in
/// [`init_thread`] until removal in [`exit`].
///
static ALL_THREADS: IntrCell<List> = IntrCell::new(List::new());

/// The initial thread: the one that booted the kernel.
/// Its page is never freed by the scheduler, because its
/// stack is not in it.
///
static INITIAL_THREAD: AtomicPtr<Thread> = AtomicPtr::new(ptr::null_mut());

/// Whether the multi-level feedback queue scheduler is
/// in use, selected at boot with "-o mlfqs". The default
/// is round-robin within strict priorities.
///
static MLFQS: AtomicBool = AtomicBool::new(false);

/// The source of thread ids.
///
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// The lock serialising thread id allocation, which is
/// called outside interrupt-safe regions during boot.
///
static TID_LOCK: Lock = Lock::new();

/// Timer ticks that found the idle thread running.
///
static IDLE_TICKS: AtomicU64 = AtomicU64::new(0);

/// Timer ticks that found a kernel thread running.
///
static KERNEL_TICKS: AtomicU64 = AtomicU64::new(0);

/// Timer ticks that found a user process running.
///
static USER_TICKS: AtomicU64 = AtomicU64::new(0);

/// Returns whether the MLFQS scheduler is in use.
///
pub fn mlfqs_enabled() -> bool {
    MLFQS.load(Ordering::Relaxed)
}

/// Uniquely identifies a thread for the lifetime of the
/// kernel.
///
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Returns a numerical representation of the thread
    /// id.
    ///
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Describes the scheduling state of a thread.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// The thread is executing on the CPU.
    Running,

    /// The thread is on a run queue, waiting its turn.
    Ready,

    /// The thread is waiting for a wakeup from another
    /// thread (or an interrupt handler) and sits on no
    /// run queue.
    Blocked,

    /// The thread has exited; its page is reclaimed by
    /// the next thread to be scheduled.
    Dying,
}

/// The error returned when a thread cannot be created.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CreateError {
    /// No page was available for the thread's control
    /// block and stack.
    OutOfMemory,
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CreateError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for CreateError {}

/// A thread control block, co-located with the thread's
/// kernel stack.
///
/// All mutable members use interior mutability: threads
/// are only ever reached through shared references (or
/// raw pointers held by the scheduler's lists), and every
/// mutation is serialised either by an atomic cell or by
/// the interrupt discipline.
///
#[repr(C)]
pub struct Thread {
    // The thread's saved stack pointer, stale while the
    // thread is running. This must stay the first member:
    // the context switch addresses it at offset zero.
    pub(crate) stack_pointer: Cell<usize>,

    // Identity.
    pub(crate) id: Cell<ThreadId>,
    name: [u8; THREAD_NAME_LEN],

    // Scheduling.
    pub(crate) status: AtomicCell<State>,
    pub(crate) priority: AtomicCell<i32>,
    pub(crate) base_priority: AtomicCell<i32>,
    pub(crate) nice: AtomicCell<i32>,
    pub(crate) recent_cpu: AtomicCell<Fixed>,

    // Priority donation. `waiting_on` is the lock this
    // thread is blocked acquiring; `donated_for` is the
    // held lock that most recently attracted a donor;
    // `donors` lists the threads whose donations raised
    // this thread's effective priority.
    pub(crate) waiting_on: Cell<*const Lock>,
    pub(crate) donated_for: Cell<*const Lock>,
    pub(crate) donors: UnsafeCell<List>,

    // Membership links: run or wait queue, the
    // all-threads list, the MLFQS bucket, and a donor
    // list respectively.
    pub(crate) elem: UnsafeCell<Link>,
    pub(crate) allelem: UnsafeCell<Link>,
    pub(crate) mlfqselem: UnsafeCell<Link>,
    pub(crate) donorelem: UnsafeCell<Link>,

    // The body the thread runs, taken exactly once by
    // the first dispatch.
    pub(crate) entry: UnsafeCell<Option<Box<dyn FnOnce() + Send>>>,

    // The tick at which a sleeping thread is due to be
    // woken, meaningful while the thread is on the sleep
    // queue.
    pub(crate) wake_at: Cell<u64>,

    // Process attachments, opaque to the threading core.
    pub(crate) parent: *mut Thread,
    pub(crate) children: UnsafeCell<List>,
    pub(crate) waiting_for_child: Cell<u64>,
    pub(crate) child_wait: Semaphore,
    pub(crate) exit_status: AtomicCell<i32>,
    pub(crate) pagedir: Cell<*mut u8>,

    // Stack-overflow detection. This must stay the last
    // member, so a stack growing down into the control
    // block destroys it first.
    magic: u64,
}

// A thread's raw members are shared between kernel
// threads, but every access is serialised by atomic
// cells or by interrupt masking on this uniprocessor.
//
unsafe impl Sync for Thread {}

impl Thread {
    /// Returns the thread's unique id.
    ///
    pub fn id(&self) -> ThreadId {
        self.id.get()
    }

    /// Returns the thread's name.
    ///
    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(THREAD_NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("<invalid>")
    }

    /// Returns the thread's scheduling state.
    ///
    pub fn state(&self) -> State {
        self.status.load()
    }

    /// Returns the thread's effective priority, which may
    /// exceed its base priority while donations are live.
    ///
    pub fn priority(&self) -> i32 {
        self.priority.load()
    }

    /// Returns the thread's base priority.
    ///
    pub fn base_priority(&self) -> i32 {
        self.base_priority.load()
    }

    /// Returns the thread's niceness.
    ///
    pub fn nice(&self) -> i32 {
        self.nice.load()
    }

    /// Returns whether the control block looks like a
    /// live thread: the magic sentinel is intact.
    ///
    pub(crate) fn is_thread(&self) -> bool {
        self.magic == THREAD_MAGIC
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id.get())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("priority", &self.priority())
            .finish()
    }
}

/// Recovers a thread from its run/wait queue link.
///
pub(crate) unsafe fn from_elem(link: *mut Link) -> *mut Thread {
    container_of!(link, Thread, elem)
}

/// Recovers a thread from its all-threads list link.
///
pub(crate) unsafe fn from_allelem(link: *mut Link) -> *mut Thread {
    container_of!(link, Thread, allelem)
}

/// Recovers a thread from its MLFQS bucket link.
///
pub(crate) unsafe fn from_mlfqselem(link: *mut Link) -> *mut Thread {
    container_of!(link, Thread, mlfqselem)
}

/// Recovers a thread from its donor list link.
///
pub(crate) unsafe fn from_donorelem(link: *mut Link) -> *mut Thread {
    container_of!(link, Thread, donorelem)
}

/// Initialises the threading system and adopts the boot
/// context as the initial thread, named "main".
///
/// Must be called with interrupts disabled, before any
/// other threading call.
///
pub(crate) fn init(use_mlfqs: bool) {
    assert!(!interrupts::are_enabled());

    MLFQS.store(use_mlfqs, Ordering::Relaxed);
    IDLE_TICKS.store(0, Ordering::Relaxed);
    KERNEL_TICKS.store(0, Ordering::Relaxed);
    USER_TICKS.store(0, Ordering::Relaxed);
    ALL_THREADS.with(|list| *list = List::new());
    cpu_local::init();
    scheduler::init(use_mlfqs);
    mlfqs::init();

    // The boot context becomes the initial thread. Its
    // control block gets a page of its own, but its stack
    // is the one the kernel booted on, so the scheduler
    // must never free this page (see schedule_tail).
    let page = memory::alloc_page().expect("out of memory while booting");
    let thread = page.as_ptr() as *mut Thread;
    unsafe {
        init_thread(thread, "main", PRI_DEFAULT, None);
        (*thread).status.store(State::Running);
    }
    INITIAL_THREAD.store(thread, Ordering::Relaxed);
    cpu_local::set_current_thread(thread);

    let id = allocate_id();
    unsafe { (*thread).id.set(id) };
}

/// Starts preemptive scheduling: creates the service
/// threads and enables interrupts.
///
/// The idle thread signals the given semaphore once it
/// has recorded itself, so that `start` only returns once
/// the scheduler has a fallback thread to run.
///
pub(crate) fn start() {
    let started = Arc::new(Semaphore::new(0));
    let idle_started = started.clone();
    create("idle", PRI_MIN, move || scheduler::idle_loop(idle_started))
        .expect("failed to create the idle thread");

    if mlfqs_enabled() {
        create("mlfqs", PRI_MAX, mlfqs::housekeeper_loop)
            .expect("failed to create the MLFQS housekeeping thread");
    }

    create("wakeup", PRI_MAX, time::timers::waker_loop)
        .expect("failed to create the wakeup thread");

    interrupts::enable();

    // Wait for the idle thread to initialise itself.
    started.down();
}

/// Tears the threading system down: frees every remaining
/// thread page, including the initial thread's control
/// block.
///
/// After `shutdown`, no threading call is valid until the
/// next [`init`].
///
pub(crate) fn shutdown() {
    interrupts::disable();

    let mut doomed: Vec<*mut Thread> = Vec::new();
    ALL_THREADS.with(|list| {
        for link in list.iter() {
            doomed.push(unsafe { from_allelem(link.as_ptr()) });
        }
        *list = List::new();
    });

    cpu_local::init();
    INITIAL_THREAD.store(ptr::null_mut(), Ordering::Relaxed);

    for thread in doomed {
        unsafe {
            process::free_children(&*thread);
            // A thread that was created but never ran
            // still owns its body.
            drop((*(*thread).entry.get()).take());
            memory::free_page(NonNull::new_unchecked(thread as *mut u8));
        }
    }
}

/// Creates a new kernel thread named `name` with the
/// given priority, executing `body`, and adds it to the
/// run queue.
///
/// If the new thread's priority exceeds the caller's, the
/// caller yields immediately and the new thread may run
/// (and even exit) before `create` returns.
///
/// Returns the new thread's id, or an error if no memory
/// was available; no partial state is left behind.
///
pub fn create<F>(name: &str, priority: i32, body: F) -> Result<ThreadId, CreateError>
where
    F: FnOnce() + Send + 'static,
{
    assert!(
        (PRI_MIN..=PRI_MAX).contains(&priority),
        "priority {} out of range",
        priority
    );

    let creator = current();
    let page = memory::alloc_page().ok_or(CreateError::OutOfMemory)?;
    let thread = page.as_ptr() as *mut Thread;
    unsafe {
        init_thread(thread, name, priority, Some(creator));
        *(*thread).entry.get() = Some(Box::new(body));
        (*thread)
            .stack_pointer
            .set(switch::seed_stack(page.as_ptr().add(memory::PAGE_SIZE)) as usize);
    }

    let id = allocate_id();
    unsafe { (*thread).id.set(id) };
    process::register_child(creator, id);

    log::debug!("created thread {} \"{}\" at priority {}", id, name, priority);

    unblock(unsafe { &*thread });

    // A creature that outranks its creator runs at once.
    // The creature may already have run and exited by the
    // time we look, so only its pointer value and the
    // priority snapshot may be used here.
    interrupts::without_interrupts(|| {
        if priority > current().priority() && !ptr::eq(thread, cpu_local::idle_thread()) {
            yield_now();
        }
    });

    Ok(id)
}

/// Puts the current thread to sleep until a matching
/// [`unblock`].
///
/// Must be called with interrupts disabled, outside
/// interrupt context. The interrupt level is unchanged on
/// return; blocking primitives restore their caller's
/// level themselves.
///
pub fn block() {
    assert!(!interrupts::in_interrupt(), "blocking in interrupt context");
    assert!(!interrupts::are_enabled(), "blocking with interrupts on");

    current().status.store(State::Blocked);
    scheduler::schedule();
}

/// Transitions a blocked thread to ready.
///
/// This never preempts: the caller may be holding
/// invariants that must not be broken by an immediate
/// switch, and may be an interrupt handler.
///
pub fn unblock(thread: &Thread) {
    assert!(thread.is_thread());

    let old = interrupts::disable();
    assert_eq!(thread.state(), State::Blocked, "unblocking a non-blocked thread");
    scheduler::enqueue(thread);
    thread.status.store(State::Ready);
    interrupts::set_level(old);
}

/// Yields the CPU. The current thread goes to the back of
/// its priority's queue and may be rescheduled at once.
///
pub fn yield_now() {
    assert!(!interrupts::in_interrupt(), "yielding in interrupt context");

    let cur = current();
    let old = interrupts::disable();
    if ptr::eq(cur as *const Thread, cpu_local::idle_thread()) {
        // The idle thread is never queued; yielding just
        // sends it back to its blocked parking state.
        cur.status.store(State::Blocked);
    } else {
        scheduler::enqueue(cur);
        cur.status.store(State::Ready);
    }
    scheduler::schedule();
    interrupts::set_level(old);
}

/// Deschedules the current thread and destroys it. Never
/// returns.
///
/// The thread's page is freed by the next thread to be
/// scheduled, in the post-switch tail.
///
pub fn exit() -> ! {
    assert!(!interrupts::in_interrupt(), "exiting in interrupt context");

    let cur = current();
    log::debug!("thread {} \"{}\" exiting", cur.id(), cur.name());

    // Let the process layer record our exit before we
    // leave the all-threads list.
    process::exit_hook(cur);

    interrupts::disable();
    ALL_THREADS.with(|list| unsafe { list.remove(cur.allelem.get()) });
    cur.status.store(State::Dying);
    scheduler::schedule();
    unreachable!("a dying thread was rescheduled");
}

/// Returns the running thread.
///
/// # Panics
///
/// Panics if the running thread's magic sentinel has been
/// destroyed, which means its stack overflowed into its
/// control block.
///
pub fn current() -> &'static Thread {
    let thread = cpu_local::current_thread();
    assert!(!thread.is_null(), "no running thread");

    let thread = unsafe { &*thread };
    assert!(thread.is_thread(), "stack overflow destroyed a control block");
    assert_eq!(thread.state(), State::Running);

    thread
}

/// Returns the live thread with the given id, if any.
///
/// The reference is valid until the thread exits.
///
pub fn by_id(id: ThreadId) -> Option<&'static Thread> {
    interrupts::without_interrupts(|| {
        let mut found: Option<*const Thread> = None;
        foreach(|t| {
            if t.id() == id {
                found = Some(t);
            }
        });
        found.map(|t| unsafe { &*t })
    })
}

/// Invokes `f` on every live thread.
///
/// Must be called with interrupts disabled, so the set of
/// threads cannot shift underneath the iteration.
///
pub fn foreach<F>(mut f: F)
where
    F: FnMut(&Thread),
{
    assert!(!interrupts::are_enabled(), "foreach with interrupts on");

    ALL_THREADS.with(|list| {
        for link in list.iter() {
            f(unsafe { &*from_allelem(link.as_ptr()) });
        }
    });
}

/// Sets the current thread's base priority, recomputing
/// its effective priority from any live donations.
///
/// Does nothing under the MLFQS, where priorities are
/// computed rather than assigned.
///
pub fn set_priority(new_priority: i32) {
    if mlfqs_enabled() {
        return;
    }

    let cur = current();
    interrupts::without_interrupts(|| {
        let base = new_priority.clamp(PRI_MIN, PRI_MAX);
        cur.base_priority.store(base);

        // The effective priority keeps the highest live
        // donation; lowering the base cannot shed donors.
        let mut effective = base;
        unsafe {
            for link in (*cur.donors.get()).iter() {
                let donor = &*from_donorelem(link.as_ptr());
                effective = effective.max(donor.priority());
            }
        }
        cur.priority.store(effective);

        if let Some(top) = scheduler::highest_ready_priority() {
            if top > cur.priority() {
                yield_now();
            }
        }
    });
}

/// Returns the current thread's effective priority.
///
pub fn get_priority() -> i32 {
    current().priority()
}

/// Sets the current thread's niceness, recomputing its
/// priority immediately and yielding if it no longer has
/// the highest claim to the CPU.
///
/// Only meaningful under the MLFQS; does nothing under
/// the round-robin scheduler.
///
pub fn set_nice(nice: i32) {
    if !mlfqs_enabled() {
        return;
    }

    let cur = current();
    interrupts::without_interrupts(|| {
        cur.nice.store(nice.clamp(NICE_MIN, NICE_MAX));
        mlfqs::update_priority(cur);

        if let Some(top) = scheduler::highest_ready_priority() {
            if cur.priority() < top {
                yield_now();
            }
        }
    });
}

/// Returns the current thread's niceness.
///
pub fn get_nice() -> i32 {
    current().nice()
}

/// Returns the system load average multiplied by 100 and
/// rounded to the nearest integer.
///
pub fn get_load_avg() -> i32 {
    (mlfqs::load_avg() * 100).round()
}

/// Returns the current thread's recent CPU estimate
/// multiplied by 100 and rounded to the nearest integer.
///
pub fn get_recent_cpu() -> i32 {
    (current().recent_cpu.load() * 100).round()
}

/// Counts of timer ticks by the kind of thread they
/// interrupted.
///
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TickCounts {
    /// Ticks that found the idle thread running.
    pub idle: u64,

    /// Ticks that found a kernel thread running.
    pub kernel: u64,

    /// Ticks that found a user process running.
    pub user: u64,
}

/// Returns the tick statistics gathered since boot.
///
pub fn tick_counts() -> TickCounts {
    TickCounts {
        idle: IDLE_TICKS.load(Ordering::Relaxed),
        kernel: KERNEL_TICKS.load(Ordering::Relaxed),
        user: USER_TICKS.load(Ordering::Relaxed),
    }
}

/// Logs the tick statistics gathered since boot.
///
pub fn print_stats() {
    let counts = tick_counts();
    log::info!(
        "thread: {} idle ticks, {} kernel ticks, {} user ticks",
        counts.idle,
        counts.kernel,
        counts.user
    );
}

/// The timer interrupt handler's per-tick work. Runs in
/// interrupt context on the interrupted thread's stack.
///
/// No locks are taken here: every touched value is an
/// atomic or is already protected by the masked
/// interrupts.
///
pub(crate) fn tick(now: u64) {
    assert!(interrupts::in_interrupt());

    let cur = current();

    // Charge the tick to the running thread.
    cur.recent_cpu.store(cur.recent_cpu.load() + 1);

    if ptr::eq(cur as *const Thread, cpu_local::idle_thread()) {
        IDLE_TICKS.fetch_add(1, Ordering::Relaxed);
    } else if !cur.pagedir.get().is_null() {
        USER_TICKS.fetch_add(1, Ordering::Relaxed);
    } else {
        KERNEL_TICKS.fetch_add(1, Ordering::Relaxed);
    }

    // Once a second, the MLFQS statistics go stale.
    if now % time::ticker::TIMER_FREQ == 0 {
        mlfqs::mark_recent_cpu_dirty();
    }

    // Wake the wakeup thread if a sleeper has come due.
    time::timers::on_tick(now);

    // Enforce preemption at the end of the time slice.
    if scheduler::slice_expired() {
        mlfqs::mark_priority_dirty();
        interrupts::yield_on_return();
    }

    if mlfqs_enabled() {
        mlfqs::kick_housekeeper();
    }
}

/// Does the basic initialisation of `thread` as a blocked
/// thread named `name` and puts it on the all-threads
/// list.
///
/// A thread inherits its niceness and recent CPU estimate
/// from its creator; the initial thread (which has none)
/// starts at zero for both.
///
unsafe fn init_thread(thread: *mut Thread, name: &str, priority: i32, creator: Option<&Thread>) {
    let (nice, recent_cpu, parent) = match creator {
        Some(c) => (
            c.nice(),
            c.recent_cpu.load(),
            c as *const Thread as *mut Thread,
        ),
        None => (NICE_INIT, Fixed::ZERO, ptr::null_mut()),
    };

    let mut name_buf = [0u8; THREAD_NAME_LEN];
    let len = name.len().min(THREAD_NAME_LEN);
    name_buf[..len].copy_from_slice(&name.as_bytes()[..len]);

    ptr::write(
        thread,
        Thread {
            stack_pointer: Cell::new(0),
            id: Cell::new(ThreadId(0)),
            name: name_buf,
            status: AtomicCell::new(State::Blocked),
            priority: AtomicCell::new(priority),
            base_priority: AtomicCell::new(priority),
            nice: AtomicCell::new(nice),
            recent_cpu: AtomicCell::new(recent_cpu),
            waiting_on: Cell::new(ptr::null()),
            donated_for: Cell::new(ptr::null()),
            donors: UnsafeCell::new(List::new()),
            elem: UnsafeCell::new(Link::new()),
            allelem: UnsafeCell::new(Link::new()),
            mlfqselem: UnsafeCell::new(Link::new()),
            donorelem: UnsafeCell::new(Link::new()),
            entry: UnsafeCell::new(None),
            wake_at: Cell::new(0),
            parent,
            children: UnsafeCell::new(List::new()),
            waiting_for_child: Cell::new(0),
            child_wait: Semaphore::new(0),
            exit_status: AtomicCell::new(EXIT_FAILURE),
            pagedir: Cell::new(ptr::null_mut()),
            magic: THREAD_MAGIC,
        },
    );

    interrupts::without_interrupts(|| {
        ALL_THREADS.with(|list| unsafe { list.push_back((*thread).allelem.get()) });
    });
}

/// Returns an id for a new thread.
///
fn allocate_id() -> ThreadId {
    TID_LOCK.acquire();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    TID_LOCK.release();

    ThreadId(id)
}

/// Returns the initial thread, which must never be freed
/// by the scheduler.
///
pub(crate) fn initial_thread() -> *mut Thread {
    INITIAL_THREAD.load(Ordering::Relaxed)
}
