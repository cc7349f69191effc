use log::*;
use futures_concurrency::future::Race;
use tokio::sync::{mpsc, watch};

use crate::{
    allocate::AllocError,
    config::{Config, ConfigError},
    device::{DeviceClass, Request, Response, Uniid, LOADER_BROADCAST},
    packet,
    table::{AddressBook, ClassTable, Slot, State},
    };
use super::{
    interpret::{interpret, Outcome},
    transport::Transport,
    persist::Store,
    events::{Event, EventKind, Listener},
    host::{Host, Operator, Command},
    };


/**
    polling task of the addressing master

    it owns the address book and is the only writer of it. One cycle is one attempt at every pending operation:

    1. discovery, a broadcast query for each class that still has a free or offline slot
    2. address assignment, resent every cycle for each slot waiting for ack
    3. online check, a heartbeat to every mapped slot
    4. loader recovery, a single global broadcast if any device runs its bootloader

    each pass visits all classes in configuration order before the next pass starts. No pass ever fails, a missing or bad answer only leaves its slot as it was for this cycle.
*/
pub struct Scheduler<T, S, L> {
    book: AddressBook,
    config: Config,
    transport: T,
    store: S,
    listener: L,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<AddressBook>,
    operator: Operator,
}

impl<T: Transport, S: Store, L: Listener> Scheduler<T, S, L> {
    /// build the address book from configuration and seed it with the persisted identifiers
    pub fn new(config: Config, transport: T, mut store: S, listener: L) -> Result<Self, ConfigError> {
        let mut book = AddressBook::new(&config.classes)?;
        for table in book.classes_mut() {
            let class = table.class();
            match store.load(class) {
                Ok(Some(identifiers)) => {
                    info!("{}: loaded {} persisted identifiers", class, identifiers.len());
                    table.seed(&identifiers);
                },
                Ok(None) => info!("{}: no persisted identifiers", class),
                Err(err) => warn!("{}: persisted identifiers unreadable, starting unmapped: {}", class, err),
            }
        }
        let (sender, commands) = mpsc::unbounded_channel();
        let (snapshot, receiver) = watch::channel(book.clone());
        Ok(Self {
            book,
            config,
            transport,
            store,
            listener,
            commands,
            snapshot,
            operator: Operator {commands: sender, snapshot: receiver},
        })
    }

    pub fn book(&self) -> &AddressBook {&self.book}
    pub fn config(&self) -> &Config {&self.config}
    pub fn transport(&self) -> &T {&self.transport}
    pub fn transport_mut(&mut self) -> &mut T {&mut self.transport}
    pub fn store(&self) -> &S {&self.store}
    pub fn listener(&self) -> &L {&self.listener}
    pub fn listener_mut(&mut self) -> &mut L {&mut self.listener}
    /// handle for other tasks to read the table and trigger operations
    pub fn operator(&self) -> Operator {self.operator.clone()}

    /**
        run the startup sequences then poll the bus until the host shuts down

        operator commands are only handled between cycles. A shutdown interrupts the pause between cycles, but never a pass
    */
    pub async fn run(&mut self, host: &impl Host) {
        self.startup().await;
        loop {
            if host.shutdown() {
                info!("shutdown, stop polling");
                return;
            }
            self.handle_commands().await;
            let pause = if host.suspended() {
                debug!("polling suspended");
                self.config.suspended_interval
            }
            else {
                self.cycle().await;
                self.config.interval(host.printing())
            };
            (
                tokio::time::sleep(pause),
                host.stopped(),
            ).race().await;
        }
    }

    /// push persisted addresses, then fetch whatever is still unknown, for every class
    pub async fn startup(&mut self) {
        for class in self.classes() {
            self.push_table(class).await;
            self.fetch_table(class).await;
            if let Some(table) = self.book.class(class) {
                let broadcast = table.broadcast();
                self.listener.notify(Event::new(EventKind::Ready, class, broadcast));
            }
        }
        info!("startup addressing done");
        self.publish();
    }

    /// one polling cycle over all classes
    pub async fn cycle(&mut self) {
        let classes = self.classes();
        for &class in &classes {
            self.discover(class).await;
        }
        for &class in &classes {
            self.assign(class).await;
        }
        for &class in &classes {
            self.online_check(class).await;
        }
        self.loader_recovery().await;
        self.publish();
    }

    /**
        send persisted address bindings to devices not heard of since startup

        stops early once every mapped slot is online, returns whether that happened
    */
    pub async fn push_table(&mut self, class: DeviceClass) -> bool {
        let Some(broadcast) = self.book.class(class).map(ClassTable::broadcast)
            else {return false};
        for attempt in 1 ..= self.config.push_attempts {
            debug!("{}: push table attempt {}", class, attempt);
            let pending = self.pending(class, |slot| slot.mapped && slot.state == State::Init);
            for (address, uniid) in pending {
                self.request(broadcast, Request::SetSlaveAddr {address, uniid}).await;
            }
            if let Some(table) = self.book.class(class) {
                let mapped = table.count(|slot| slot.mapped);
                let online = table.count(|slot| slot.mapped && slot.state == State::Online);
                debug!("{}: {} of {} mapped devices online", class, online, mapped);
                if online == mapped {
                    return true;
                }
            }
        }
        false
    }

    /**
        ask every address not yet online which device sits there

        stops early once every slot is online, returns whether that happened
    */
    pub async fn fetch_table(&mut self, class: DeviceClass) -> bool {
        for attempt in 1 ..= self.config.fetch_attempts {
            debug!("{}: fetch table attempt {}", class, attempt);
            let addresses = self.addresses(class, |slot| slot.state != State::Online);
            for address in addresses {
                self.request(address, Request::GetAddrTable).await;
            }
            if self.book.class(class).is_some_and(ClassTable::all_online) {
                info!("{}: all devices online", class);
                self.log_table(class);
                return true;
            }
        }
        self.log_table(class);
        false
    }

    /**
        broadcast a discovery query, unless every slot is online or waiting for ack

        returns the allocation triggered by the answer, if any
    */
    pub async fn discover(&mut self, class: DeviceClass) -> Option<Result<u8, AllocError>> {
        let table = self.book.class(class)?;
        if table.count(|slot| matches!(slot.state, State::Online | State::WaitingForAck)) == table.len() {
            debug!("{}: every slot busy, skip discovery", class);
            return None;
        }
        let broadcast = table.broadcast();
        let allocation = self.request(broadcast, Request::GetSlaveInfo {broadcast}).await?.allocation;
        match allocation {
            Some(Err(AllocError::NoSlotAvailable)) =>
                warn!("{}: a new device answered but every address is taken", class),
            Some(Err(AllocError::AlreadyAllocated {address})) =>
                info!("{}: device at {:#04X} will be reassigned next cycle", class, address),
            _ => {},
        }
        allocation
    }

    /// send the address assignment of every slot waiting for ack
    pub async fn assign(&mut self, class: DeviceClass) {
        let Some(broadcast) = self.book.class(class).map(ClassTable::broadcast)
            else {return};
        let pending = self.pending(class, |slot| slot.mapped && slot.state == State::WaitingForAck);
        for (address, uniid) in pending {
            self.request(broadcast, Request::SetSlaveAddr {address, uniid}).await;
        }
    }

    /// send a heartbeat to every mapped slot, declaring offline those missing too many
    pub async fn online_check(&mut self, class: DeviceClass) {
        let addresses = self.addresses(class, |slot| slot.mapped);
        let mut lost = false;
        for &address in &addresses {
            if let Some(slot) = self.book.class_mut(class).and_then(|table| table.slot_at_mut(address)) {
                slot.lost = slot.lost.saturating_add(1);
            }
            self.request(address, Request::OnlineCheck).await;

            let Some(slot) = self.book.class_mut(class).and_then(|table| table.slot_at_mut(address))
                else {continue};
            if slot.lost > self.config.max_lost {
                lost = true;
                slot.acked = false;
                if slot.state != State::Offline {
                    slot.state = State::Offline;
                    warn!("{}: {:#04X} offline", class, address);
                    self.listener.notify(Event::new(EventKind::Disconnected, class, address));
                }
            }
        }
        if !addresses.is_empty() {
            self.log_table(class);
            if !lost {
                debug!("{}: all online", class);
            }
        }
    }

    /// broadcast a jump to application if any device reported its bootloader, once per cycle at most
    pub async fn loader_recovery(&mut self) -> bool {
        let Some(class) = self.book.classes().iter().find(|table| table.any_loader()).map(ClassTable::class)
            else {return false};
        info!("{}: device in loader mode, request all devices to start their application", class);
        self.request(LOADER_BROADCAST, Request::LoaderToApp).await;
        true
    }

    /// send a request, then decode and apply its answer, persisting identifiers if they changed
    async fn request(&mut self, address: u8, request: Request) -> Option<Outcome> {
        let function = request.function();
        let timeout = self.config.timeouts.of(function);
        let frame = self.transport.send(address, function, &request.payload(), timeout).await;
        let Some(frame) = frame
            else {
                debug!("no answer to {:?} on {:#04X}", function, address);
                return None;
            };
        let response = match packet::decode(&frame) {
            Ok(packet) => match Response::decode(&packet) {
                Ok(response) => response,
                Err(err) => {
                    warn!("dropped answer to {:?} on {:#04X}: {}", function, address, err);
                    return None;
                },
            },
            Err(err) => {
                warn!("dropped frame answering {:?} on {:#04X}: {}", function, address, err);
                return None;
            },
        };
        if response.function() != function {
            debug!("{:?} answered to {:?} on {:#04X}", response.function(), function, address);
        }
        let outcome = interpret(&mut self.book, &response, &mut self.listener);
        if let Some(class) = outcome.changed {
            self.persist(class);
        }
        Some(outcome)
    }

    /// save identifiers of a class, the in-memory table stays authoritative if this fails
    fn persist(&mut self, class: DeviceClass) {
        let Some(table) = self.book.class(class)
            else {return};
        match self.store.save(class, &table.identifiers()) {
            Ok(()) => info!("{}: identifiers saved", class),
            Err(err) => error!("{}: cannot save identifiers, keeping them in memory only: {}", class, err),
        }
    }

    async fn handle_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::FetchTable => {
                    info!("operator requested table fetch");
                    for class in self.classes() {
                        self.fetch_table(class).await;
                    }
                    self.publish();
                },
                Command::Discover => {
                    info!("operator requested discovery");
                    for class in self.classes() {
                        self.discover(class).await;
                        self.assign(class).await;
                    }
                    self.publish();
                },
            }
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.book.clone());
    }

    fn classes(&self) -> Vec<DeviceClass> {
        self.book.classes().iter().map(ClassTable::class).collect()
    }

    fn addresses(&self, class: DeviceClass, filter: impl Fn(&Slot) -> bool) -> Vec<u8> {
        self.book.class(class)
            .map(|table| table.slots().iter()
                .filter(|slot| filter(slot))
                .map(|slot| slot.address())
                .collect())
            .unwrap_or_default()
    }

    fn pending(&self, class: DeviceClass, filter: impl Fn(&Slot) -> bool) -> Vec<(u8, Uniid)> {
        self.book.class(class)
            .map(|table| table.slots().iter()
                .filter(|slot| filter(slot))
                .map(|slot| (slot.address(), slot.uniid.clone()))
                .collect())
            .unwrap_or_default()
    }

    fn log_table(&self, class: DeviceClass) {
        if let Some(table) = self.book.class(class) {
            for line in table.dump() {
                debug!("{}", line);
            }
        }
    }
}
