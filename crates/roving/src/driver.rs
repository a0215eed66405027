//! Background maintenance thread.

use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};

use crate::node::{Node, NodeContext};

/// Runs [`Node::tick`] on a dedicated thread every `period`.
///
/// The thread holds the node weakly and exits on its own once the node is
/// dropped. Dropping the driver stops the thread and waits for it.
#[derive(Debug)]
pub struct Driver {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Driver {
    /// Starts ticking `node`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(node: &Node, period: Duration) -> io::Result<Self> {
        let (shutdown, stop) = channel::bounded::<()>(0);
        let weak = node.downgrade();
        let thread = thread::Builder::new()
            .name(format!("roving-driver-{}", node.address()))
            .spawn(move || run(&weak, period, &stop))?;
        Ok(Self {
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    /// Stops the thread and waits for the tick in progress, if any.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Returns `true` while the thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    fn stop(&mut self) {
        // Disconnecting the channel wakes the select below.
        drop(self.shutdown.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(node: &Weak<NodeContext>, period: Duration, stop: &channel::Receiver<()>) {
    let ticker = channel::tick(period);
    loop {
        channel::select! {
            recv(ticker) -> _ => {
                let Some(context) = node.upgrade() else {
                    return;
                };
                Node::from_context(context).tick();
            }
            recv(stop) -> _ => return,
        }
    }
}
