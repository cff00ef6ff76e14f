//! Abstraction over spawning and time, so the committer and subscription
//! manager can be driven deterministically in tests without a real tokio
//! executor. Deliberately narrow -- just what the core needs: spawn a
//! background worker and read wall-clock time -- rather than the
//! HTTP-fetch, isolate-thread, and virtualized-replay-clock surface a
//! full application runtime abstraction would also carry.
use std::{
    future::Future,
    time::SystemTime,
};

pub trait SpawnHandle: Send {
    fn shutdown(&mut self);
}

pub struct TokioSpawnHandle(tokio::task::JoinHandle<()>);

impl SpawnHandle for TokioSpawnHandle {
    fn shutdown(&mut self) {
        self.0.abort();
    }
}

pub trait Runtime: Clone + Send + Sync + 'static {
    fn spawn(&self, name: &'static str, f: impl Future<Output = ()> + Send + 'static) -> Box<dyn SpawnHandle>;
    fn system_time(&self) -> SystemTime;
}

#[derive(Clone, Copy, Default)]
pub struct TokioRuntime;

impl Runtime for TokioRuntime {
    fn spawn(&self, _name: &'static str, f: impl Future<Output = ()> + Send + 'static) -> Box<dyn SpawnHandle> {
        Box::new(TokioSpawnHandle(tokio::spawn(f)))
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}
