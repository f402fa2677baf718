use bevy::{
    prelude::*,
    tasks::{AsyncComputeTaskPool, TaskPool},
};
use std::sync::{Arc, Mutex};

/// Lifecycle of a background task created through a [`TaskScheduler`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskState {
    /// Not queued, ready for execution.
    Idle,
    /// Queued or currently executing.
    Queued,
    /// Finished executing; call [`TaskHandle::reset`] before re-queueing.
    Completed,
}

/// Handle to a reusable background task.
pub trait TaskHandle: Send + Sync {
    /// Queues the task body for execution. Ignored while the task is already
    /// queued or awaiting a [`Self::reset`].
    fn queue_execution(&mut self);

    fn state(&self) -> TaskState;

    /// Returns a completed task to [`TaskState::Idle`].
    fn reset(&mut self);
}

/// Creates cooperative background tasks.
///
/// The terrain system never blocks on a task, it polls
/// [`TaskHandle::state`] once per update cycle instead.
pub trait TaskScheduler: Send + Sync {
    fn create_task(&self, name: &str, body: Box<dyn FnMut() + Send>) -> Box<dyn TaskHandle>;
}

/// The task scheduler used by all terrain sheets.
#[derive(Resource, Clone)]
pub struct TerrainTasks(pub Arc<dyn TaskScheduler>);

impl Default for TerrainTasks {
    fn default() -> Self {
        Self(Arc::new(ThreadPoolTasks))
    }
}

/// Runs task bodies on the async compute task pool.
pub struct ThreadPoolTasks;

struct PooledTask {
    name: String,
    body: Arc<Mutex<Box<dyn FnMut() + Send>>>,
    completion: Option<async_channel::Receiver<()>>,
}

impl TaskScheduler for ThreadPoolTasks {
    fn create_task(&self, name: &str, body: Box<dyn FnMut() + Send>) -> Box<dyn TaskHandle> {
        Box::new(PooledTask {
            name: name.into(),
            body: Arc::new(Mutex::new(body)),
            completion: None,
        })
    }
}

impl TaskHandle for PooledTask {
    fn queue_execution(&mut self) {
        if self.state() != TaskState::Idle {
            return;
        }

        let (sender, receiver) = async_channel::bounded(1);
        let body = self.body.clone();

        AsyncComputeTaskPool::get_or_init(TaskPool::default)
            .spawn(async move {
                (body.lock().unwrap())();
                let _ = sender.try_send(());
            })
            .detach();

        trace!("queued terrain task {}", self.name);
        self.completion = Some(receiver);
    }

    fn state(&self) -> TaskState {
        match &self.completion {
            None => TaskState::Idle,
            Some(receiver) if receiver.is_empty() => TaskState::Queued,
            Some(_) => TaskState::Completed,
        }
    }

    fn reset(&mut self) {
        self.completion = None;
    }
}

/// Executes task bodies synchronously when they are queued. Useful for tests
/// and headless tools, where deterministic completion matters more than
/// parallelism.
pub struct InlineTasks;

struct InlineTask {
    body: Mutex<Box<dyn FnMut() + Send>>,
    state: TaskState,
}

impl TaskScheduler for InlineTasks {
    fn create_task(&self, _name: &str, body: Box<dyn FnMut() + Send>) -> Box<dyn TaskHandle> {
        Box::new(InlineTask {
            body: Mutex::new(body),
            state: TaskState::Idle,
        })
    }
}

impl TaskHandle for InlineTask {
    fn queue_execution(&mut self) {
        if self.state != TaskState::Idle {
            return;
        }

        (self.body.get_mut().unwrap())();
        self.state = TaskState::Completed;
    }

    fn state(&self) -> TaskState {
        self.state
    }

    fn reset(&mut self) {
        self.state = TaskState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_tasks_complete_synchronously() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let mut task = InlineTasks.create_task(
            "test",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(task.state(), TaskState::Idle);
        task.queue_execution();
        assert_eq!(task.state(), TaskState::Completed);

        // queueing without a reset is ignored
        task.queue_execution();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        task.reset();
        task.queue_execution();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
