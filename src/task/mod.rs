/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) larch contributors
 */

//! Tasks and the round-robin scheduler.
//!
//! Single CPU, cooperative at syscall boundaries, preemptive on the
//! timer tick. A task blocks by publishing a [`Waitable`] and
//! rescheduling; the scheduler polls the waitable while picking and
//! flips the task back to `Runnable` when it reports finished.

use {
    crate::{
        arch::aarch32::context::{task_switch, Registers},
        exception::asynchronous::{exec_with_irq_masked, IrqDisabled},
        fs::{FileDescriptorTable, FileMode},
        memory::{
            heap::kmalloc,
            region::PAGE_SIZE,
            task_heap::TaskHeap,
        },
        platform::raspberrypi::{interrupt_controller::interrupt_controller, pl011_uart},
        println,
        synchronization::{interface::Mutex, IRQSafeNullLock},
        syscall::errno::EBADF,
        time::{jiffies, SYS_HZ},
    },
    alloc::{boxed::Box, string::String, vec::Vec},
    once_cell::unsync::OnceCell,
};

pub mod stack;

use self::stack::Stack;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Task lifecycle. There is no exited state: exit removes the task.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum State {
    New,
    Runnable,
    Waiting,
}

/// What a waiting task is blocked on. A closed set with a single
/// predicate keeps the scheduler's polling loop allocation-free.
#[derive(Copy, Clone, Debug)]
pub enum Waitable {
    /// Sleeping until the deadline jiffy.
    Sleep { deadline: u32 },
    /// Blocked on the single outstanding UART request.
    UartRequest,
}

/// Kernel tasks run privileged on one stack; user tasks get their own
/// stack and heap.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum TaskKind {
    User,
    Kernel,
}

/// One task.
pub struct Task {
    name: String,
    state: State,
    // The stacks are owned here so they stay mapped until the task is
    // reaped; only the register snapshot reads their addresses.
    #[allow(dead_code)]
    user_stack: Option<Stack>,
    #[allow(dead_code)]
    kernel_stack: Option<Stack>,
    registers: Registers,
    heap: Option<TaskHeap>,
    jiffies_when_scheduled: u32,
    cpu_jiffies: u32,
    waiting_for: Option<Waitable>,
    fd_table: FileDescriptorTable,
}

/// Task list and scheduling state.
pub struct TaskManager {
    /// Boxed so raw task references stay put while the list shifts.
    tasks: Vec<Box<Task>>,
    running_index: usize,
    /// An exited task parked until the next scheduler entry; its kernel
    /// stack is the one the exit path switched away on.
    zombie: Option<Box<Task>>,
}

/// The lazily initialized global task manager.
pub struct TaskManagerCell {
    inner: IRQSafeNullLock<OnceCell<TaskManager>>,
}

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

const KERNEL_STACK_SIZE: usize = 8 * PAGE_SIZE;
const USER_STACK_SIZE: usize = 2 * 1024 * 1024;
const USER_HEAP_SIZE: usize = 4 * 1024 * 1024;

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static TASK_MANAGER: TaskManagerCell = TaskManagerCell {
    inner: IRQSafeNullLock::new(OnceCell::new()),
};

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl Waitable {
    /// The predicate the scheduler polls.
    pub fn is_finished(&self) -> bool {
        match self {
            Waitable::Sleep { deadline } => *deadline <= jiffies(),
            Waitable::UartRequest => pl011_uart::request_finished(),
        }
    }
}

impl Task {
    /// Build a task. `entry` is the address the task starts at; user
    /// tasks get a user stack and heap on top of the kernel stack, and
    /// every task starts with `/dev/zero` as stdin and `/dev/null` as
    /// stdout.
    pub fn try_create(name: &str, entry: usize, kind: TaskKind) -> Option<Box<Task>> {
        let kernel_stack = Stack::try_create(KERNEL_STACK_SIZE)?;

        let (user_stack, registers) = match kind {
            TaskKind::Kernel => (
                None,
                Registers::new_kernel(kernel_stack.sp() as u32, entry as u32),
            ),
            TaskKind::User => {
                let user_stack = Stack::try_create(USER_STACK_SIZE)?;
                let registers = Registers::new_user(
                    user_stack.sp() as u32,
                    kernel_stack.sp() as u32,
                    entry as u32,
                );
                (Some(user_stack), registers)
            }
        };

        let heap_backing = kmalloc(USER_HEAP_SIZE);
        if heap_backing.is_null() {
            return None;
        }
        let heap = unsafe { TaskHeap::adopt(heap_backing as usize, USER_HEAP_SIZE) };

        let mut fd_table = FileDescriptorTable::new();
        if fd_table.open("/dev/zero", FileMode::Read) < 0 {
            return None;
        }
        if fd_table.open("/dev/null", FileMode::Write) < 0 {
            return None;
        }

        Some(Box::new(Task {
            name: String::from(name),
            state: State::New,
            user_stack,
            kernel_stack: Some(kernel_stack),
            registers,
            heap: Some(heap),
            jiffies_when_scheduled: 0,
            cpu_jiffies: 0,
            waiting_for: None,
            fd_table,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_kernel_task(&self) -> bool {
        self.registers.is_kernel_registers()
    }

    /// File operations, routed through the task's descriptor table.
    pub fn open(&mut self, path: &str, mode: FileMode) -> i32 {
        self.fd_table.open(path, mode)
    }

    pub fn read(&mut self, fd: i32, buf: *mut u8, at_most_bytes: usize) -> isize {
        if let Err(e) = validate_transfer_size(at_most_bytes) {
            return e;
        }
        let Some((file, mode)) = self.fd_table.try_get(fd) else {
            return -EBADF as isize;
        };
        let buf = unsafe { core::slice::from_raw_parts_mut(buf, at_most_bytes) };
        crate::fs::read_through(file, mode, buf)
    }

    pub fn write(&mut self, fd: i32, buf: *const u8, bytes: usize) -> isize {
        if let Err(e) = validate_transfer_size(bytes) {
            return e;
        }
        let Some((file, mode)) = self.fd_table.try_get(fd) else {
            return -EBADF as isize;
        };
        let buf = unsafe { core::slice::from_raw_parts(buf, bytes) };
        crate::fs::write_through(file, mode, buf)
    }

    pub fn close(&mut self, fd: i32) -> i32 {
        self.fd_table.close(fd)
    }

    pub fn dup(&mut self, fd: i32) -> i32 {
        self.fd_table.dup(fd)
    }

    /// Move the task heap break; returns the new break or 0.
    pub fn sbrk(&mut self, increase: usize) -> usize {
        match &mut self.heap {
            Some(heap) => heap.sbrk(increase),
            None => 0,
        }
    }

    /// CPU jiffies consumed, including the running slice.
    pub fn cputime(&self, currently_running: bool) -> u32 {
        if currently_running {
            self.cpu_jiffies + (jiffies() - self.jiffies_when_scheduled)
        } else {
            self.cpu_jiffies
        }
    }

    //----------------------------------------------------------------------------------------------
    // Private Code
    //----------------------------------------------------------------------------------------------

    /// Waiting -> Runnable when the waitable finished. Only the
    /// scheduler's pick loop calls this.
    fn update_state(&mut self) {
        if self.state == State::Waiting {
            if let Some(waitable) = &self.waiting_for {
                if waitable.is_finished() {
                    self.state = State::Runnable;
                    self.waiting_for = None;
                }
            }
        }
    }

    fn can_run(&self) -> bool {
        matches!(self.state, State::New | State::Runnable)
    }

    #[cfg(test)]
    fn new_for_tests(name: &str, state: State) -> Box<Task> {
        Box::new(Task {
            name: String::from(name),
            state,
            user_stack: None,
            kernel_stack: None,
            registers: Registers::new_kernel(0, 0),
            heap: None,
            jiffies_when_scheduled: 0,
            cpu_jiffies: 0,
            waiting_for: None,
            fd_table: FileDescriptorTable::new(),
        })
    }
}

impl TaskManager {
    /// The initial task set: the user shell, and the spin task whose
    /// only job is to keep the runnable set non-empty so the pick loop
    /// always terminates.
    pub fn new() -> Self {
        let mut manager = Self {
            tasks: Vec::new(),
            running_index: 0,
            zombie: None,
        };

        let shell = Task::try_create(
            "shell",
            crate::user::shell::shell_main as *const () as usize,
            TaskKind::User,
        )
        .expect("could not create shell task, out of memory?");
        manager.tasks.push(shell);

        let spin = Task::try_create("spin", spin_task_entry as *const () as usize, TaskKind::Kernel)
            .expect("could not create spin task, out of memory?");
        manager.tasks.push(spin);

        manager
    }

    #[cfg(test)]
    fn with_tasks(tasks: Vec<Box<Task>>) -> Self {
        Self {
            tasks,
            running_index: 0,
            zombie: None,
        }
    }

    pub fn running_task_mut(&mut self) -> &mut Task {
        &mut self.tasks[self.running_index]
    }

    pub fn running_task(&self) -> &Task {
        &self.tasks[self.running_index]
    }

    /// Round-robin from the slot after the running task, refreshing
    /// waitable state along the way. Terminates because the spin task is
    /// always runnable.
    fn pick_next_index(&mut self) -> usize {
        let mut index = self.running_index;
        loop {
            index += 1;
            if index >= self.tasks.len() {
                index = 0;
            }
            self.tasks[index].update_state();
            if self.tasks[index].can_run() {
                return index;
            }
        }
    }

    /// Dispatch bookkeeping for the task about to run.
    fn mark_dispatched(&mut self, index: usize) {
        let task = &mut self.tasks[index];
        task.state = State::Runnable;
        task.jiffies_when_scheduled = jiffies();
    }

    /// Pick the next task and switch to it; no-op when the pick is the
    /// running task itself.
    pub fn schedule(&mut self, irq: &IrqDisabled) {
        // Safe point: whoever exited last has been off its stacks since
        // the switch that brought us here.
        self.reap_zombie();

        let current = self.running_index;
        let next = self.pick_next_index();
        if next == current {
            return;
        }

        self.running_index = next;
        self.mark_dispatched(next);

        let outgoing: *mut Task = self.tasks[current].as_mut();
        let incoming: *const Task = self.tasks[next].as_ref();
        unsafe {
            let outgoing = &mut *outgoing;
            let incoming = &*incoming;

            outgoing.cpu_jiffies += jiffies() - outgoing.jiffies_when_scheduled;

            let save_is_kernel = outgoing.is_kernel_task();
            let load_is_kernel = incoming.is_kernel_task();
            task_switch(
                Some(&mut outgoing.registers),
                save_is_kernel,
                &incoming.registers,
                load_is_kernel,
                irq,
            );
        }
    }

    /// First dispatch; the boot context is discarded.
    pub fn start_scheduler(&mut self, irq: &IrqDisabled) -> ! {
        self.mark_dispatched(0);
        let task = &self.tasks[0];
        unsafe {
            task_switch(None, false, &task.registers, task.is_kernel_task(), irq);
        }
        unreachable!("the boot context is never switched back to");
    }

    /// Remove the running task for good. Its stacks are still live under
    /// this call, so the task is parked as a zombie and dropped at the
    /// next scheduler entry; the heap goes with it.
    pub fn exit_running_task(&mut self, code: i32, irq: &IrqDisabled) -> ! {
        let exited = self.tasks.remove(self.running_index);
        println!("{} has exited with code: {}", exited.name(), code);

        // Dropping a previous zombie here is fine; only the freshly
        // exited task's stacks are in use.
        self.zombie = Some(exited);

        let next = self.pick_next_index();
        self.running_index = next;
        self.mark_dispatched(next);

        let task = &self.tasks[next];
        unsafe {
            task_switch(None, false, &task.registers, task.is_kernel_task(), irq);
        }
        unreachable!("an exited task is never switched back to");
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn reap_zombie(&mut self) {
        self.zombie = None;
    }
}

impl TaskManagerCell {
    /// Run `f` against the task manager, IRQs masked.
    ///
    /// Panics when the scheduler has not been initialized yet.
    pub fn lock<R>(&self, f: impl FnOnce(&mut TaskManager) -> R) -> R {
        self.inner.lock(|cell| {
            f(cell.get_mut().expect("task manager used before tasks_init"))
        })
    }
}

/// Return a reference to the global task manager.
pub fn task_manager() -> &'static TaskManagerCell {
    &TASK_MANAGER
}

/// Block the running task on `waitable`. Returns after the scheduler has
/// dispatched this task again, i.e. once the waitable finished.
pub fn reschedule_while_waiting_for(waitable: Waitable) {
    exec_with_irq_masked(|irq| {
        task_manager().lock(|tm| {
            let task = tm.running_task_mut();
            task.state = State::Waiting;
            task.waiting_for = Some(waitable);
            tm.schedule(irq);
        });
    });
}

/// Put the running task to sleep for `secs` seconds of jiffies.
pub fn sleep(secs: u32) {
    reschedule_while_waiting_for(Waitable::Sleep {
        deadline: jiffies() + secs * SYS_HZ,
    });
}

/// Run `f` against the running task.
///
/// The reference is handed out of the manager lock so fd-backed IO can
/// reschedule underneath it. Sound on this kernel because task records
/// are boxed (list shifts do not move them) and a task record is only
/// ever mutated from its own syscall context or, for the scheduling
/// fields, under masked IRQs.
pub fn with_running_task<R>(f: impl FnOnce(&mut Task) -> R) -> R {
    let task: *mut Task = task_manager().lock(|tm| tm.running_task_mut() as *mut Task);
    f(unsafe { &mut *task })
}

/// Enable the timer interrupt and hand the CPU to the first task.
/// Called once at the end of boot; does not return.
pub fn init() -> ! {
    exec_with_irq_masked(|irq| {
        interrupt_controller().enable_timer();

        task_manager().inner.lock(|cell| {
            if cell.set(TaskManager::new()).is_err() {
                panic!("tasks_init called twice");
            }
        });

        task_manager().lock(|tm| tm.start_scheduler(irq))
    })
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

/// Always runnable, never useful. Guarantees the scheduler finds a task.
extern "C" fn spin_task_entry() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

fn validate_transfer_size(bytes: usize) -> Result<(), isize> {
    use crate::syscall::errno::EINVAL;

    if bytes > isize::MAX as usize {
        return Err(-EINVAL as isize);
    }
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time;

    #[test]
    fn round_robin_skips_waiting_tasks() {
        // Scenario: shell blocked on the UART (which is idle-finished in
        // tests, so use a sleep far in the future), sleeper blocked,
        // spin runnable. The pick must land on spin every time.
        let far = jiffies() + 1_000_000;
        let mut shell = Task::new_for_tests("shell", State::Waiting);
        shell.waiting_for = Some(Waitable::Sleep { deadline: far });
        let mut sleeper = Task::new_for_tests("sleeper", State::Waiting);
        sleeper.waiting_for = Some(Waitable::Sleep { deadline: far });
        let spin = Task::new_for_tests("spin", State::Runnable);

        let mut tm = TaskManager::with_tasks(vec![shell, sleeper, spin]);
        tm.running_index = 2;

        for _ in 0..3 {
            assert_eq!(tm.pick_next_index(), 2);
        }
    }

    #[test]
    fn sleeper_wakes_once_jiffies_pass_the_deadline() {
        // S1: A sleeps, jiffies advance past the deadline, the next pick
        // dispatches A again. The margin is generous because the jiffy
        // counter is shared with concurrently running tests.
        let margin = 125 * SYS_HZ;
        let deadline = jiffies() + margin;
        let mut sleeper = Task::new_for_tests("a", State::Waiting);
        sleeper.waiting_for = Some(Waitable::Sleep { deadline });
        let spin = Task::new_for_tests("spin", State::Runnable);

        let mut tm = TaskManager::with_tasks(vec![sleeper, spin]);
        tm.running_index = 1;

        // Not yet: the sleeper stays waiting, spin is picked.
        assert_eq!(tm.pick_next_index(), 1);
        assert_eq!(tm.tasks[0].state(), State::Waiting);

        time::increase_jiffies(margin);

        assert_eq!(tm.pick_next_index(), 0);
        assert_eq!(tm.tasks[0].state(), State::Runnable);
        assert!(tm.tasks[0].waiting_for.is_none());
    }

    #[test]
    fn new_tasks_are_eligible_to_run() {
        let new_task = Task::new_for_tests("fresh", State::New);
        assert!(new_task.can_run());

        let mut tm = TaskManager::with_tasks(vec![new_task]);
        assert_eq!(tm.pick_next_index(), 0);
    }

    #[test]
    fn update_state_only_touches_waiting_tasks() {
        let mut task = Task::new_for_tests("t", State::Runnable);
        task.update_state();
        assert_eq!(task.state(), State::Runnable);

        let mut waiting = Task::new_for_tests("w", State::Waiting);
        waiting.waiting_for = Some(Waitable::Sleep {
            deadline: jiffies(),
        });
        waiting.update_state();
        assert_eq!(waiting.state(), State::Runnable);
    }

    #[test]
    fn oversized_transfers_are_einval_before_any_fd_lookup() {
        use crate::syscall::errno::EINVAL;

        // S6: the size check fires first; the descriptor table of this
        // bare task is empty, so reaching it would report EBADF instead.
        let mut task = Task::new_for_tests("t", State::Runnable);
        let mut byte = 0_u8;

        let oversized = isize::MAX as usize + 1;
        assert_eq!(
            task.write(0, &byte as *const u8, oversized),
            -EINVAL as isize
        );
        assert_eq!(
            task.read(0, &mut byte as *mut u8, oversized),
            -EINVAL as isize
        );

        // In-range sizes on a bare task do hit the descriptor check.
        use crate::syscall::errno::EBADF;
        assert_eq!(task.write(0, &byte as *const u8, 1), -EBADF as isize);
    }

    #[test]
    fn cputime_accumulates_the_running_slice() {
        let mut task = Task::new_for_tests("t", State::Runnable);
        task.cpu_jiffies = 5;
        task.jiffies_when_scheduled = jiffies();

        time::increase_jiffies(2);
        assert!(task.cputime(true) >= 7);
        assert_eq!(task.cputime(false), 5);
    }
}
