use std::sync::atomic::{AtomicBool, Ordering::*};
use tokio::sync::{mpsc, watch, Notify};

use crate::table::AddressBook;


/**
    state of the printer hosting the bus master

    polled by the scheduler at every cycle boundary, never in the middle of a pass
*/
#[allow(async_fn_in_trait)]
pub trait Host {
    /// a print job is running or paused, the bus must be left to motion traffic
    fn printing(&self) -> bool;
    /// the scheduler must return
    fn shutdown(&self) -> bool;
    /// polling is temporarily suspended, typically during manual feeding
    fn suspended(&self) -> bool {false}
    /// complete once shutdown is requested, cutting the pause between cycles short. Hosts without such signal are only polled
    async fn stopped(&self) {
        std::future::pending::<()>().await
    }
}

/// [Host] backed by flags other tasks can set
#[derive(Debug, Default)]
pub struct HostFlags {
    printing: AtomicBool,
    shutdown: AtomicBool,
    suspended: AtomicBool,
    stop: Notify,
}
impl HostFlags {
    pub fn set_printing(&self, printing: bool) {self.printing.store(printing, Relaxed)}
    pub fn set_suspended(&self, suspended: bool) {self.suspended.store(suspended, Relaxed)}
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, SeqCst);
        self.stop.notify_waiters();
    }
}
impl Host for HostFlags {
    fn printing(&self) -> bool {self.printing.load(Relaxed)}
    fn shutdown(&self) -> bool {self.shutdown.load(SeqCst)}
    fn suspended(&self) -> bool {self.suspended.load(Relaxed)}
    async fn stopped(&self) {
        // registered before the flag check, so a request in between is not missed
        let stop = self.stop.notified();
        if self.shutdown() {
            return;
        }
        stop.await
    }
}
impl<H: Host + ?Sized> Host for &H {
    fn printing(&self) -> bool {(**self).printing()}
    fn shutdown(&self) -> bool {(**self).shutdown()}
    fn suspended(&self) -> bool {(**self).suspended()}
    async fn stopped(&self) {(**self).stopped().await}
}
impl<H: Host + ?Sized> Host for std::sync::Arc<H> {
    fn printing(&self) -> bool {(**self).printing()}
    fn shutdown(&self) -> bool {(**self).shutdown()}
    fn suspended(&self) -> bool {(**self).suspended()}
    async fn stopped(&self) {(**self).stopped().await}
}


/// operator requests, executed by the scheduler between two cycles
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// run the table fetch sequence again on every class
    FetchTable,
    /// query and assign every class now, without waiting for the next cycle
    Discover,
}

/**
    handle given to operator commands and other tasks reading the address table

    reads are snapshots published at the end of each cycle, so they can lag the scheduler by one cycle
*/
#[derive(Clone, Debug)]
pub struct Operator {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) snapshot: watch::Receiver<AddressBook>,
}
impl Operator {
    /// copy of the address book as of the last cycle
    pub fn snapshot(&self) -> AddressBook {
        self.snapshot.borrow().clone()
    }
    /// address, identifier, mapped, online, acked, lost count and mode of every slot
    pub fn dump(&self) -> Vec<String> {
        self.snapshot.borrow().dump()
    }
    /// ask the scheduler to fetch the address table again, returns false if the scheduler is gone
    pub fn trigger_fetch(&self) -> bool {
        self.commands.send(Command::FetchTable).is_ok()
    }
    /// ask the scheduler for an immediate discovery, returns false if the scheduler is gone
    pub fn trigger_discovery(&self) -> bool {
        self.commands.send(Command::Discover).is_ok()
    }
    /// wait for the next published snapshot, returns false if the scheduler is gone
    pub async fn changed(&mut self) -> bool {
        self.snapshot.changed().await.is_ok()
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;
    use futures_concurrency::future::Join;
    use super::*;

    fn test<F: Future>(test: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("failed to create runtime")
        .block_on(test)
    }

    #[test]
    fn stopped_wakes_on_request() {
        test(async {
            let host = HostFlags::default();
            let start = tokio::time::Instant::now();
            (
                host.stopped(),
                async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    host.request_shutdown();
                },
            ).join().await;
            assert_eq!(start.elapsed(), Duration::from_secs(3));
            // already requested, nothing left to wait for
            (&host).stopped().await;
            assert!(host.shutdown());
        });
    }
}
