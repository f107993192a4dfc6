//! Asynchronous device notifications
//!
//! A [`Dispatcher`] holds an arrival watch and a departure watch on the same
//! filter. Each arriving service is opened into a [`Connection`] and handed
//! to the observer; each departing service is reduced to its identity.
//!
//! Both watches are installed before either initial batch is processed, so a
//! device that disappears while the arrivals are being opened is still
//! reported. Callbacks run on whatever thread drives the host's event source.

use crate::connection::Connection;
use crate::host::{UsbHost, WatchKind};
use crate::observer::DeviceObserver;
use protocol::{MatchFilter, UsbError};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

type SharedObserver<O> = Arc<Mutex<O>>;

/// Installed arrival and departure watches
pub struct Dispatcher<H: UsbHost> {
    filter: MatchFilter,
    arrival: Option<H::Watch>,
    departure: Option<H::Watch>,
}

impl<H: UsbHost> Dispatcher<H> {
    /// Watch devices matching `filter`, opening interface 0 of each arrival
    pub fn watch<O>(host: H, filter: MatchFilter, observer: O) -> Result<Self, UsbError>
    where
        O: DeviceObserver<H> + Send + 'static,
    {
        Self::watch_interface(host, filter, 0, observer)
    }

    /// Watch devices matching `filter`, opening the `interface_index`-th
    /// interface of each arrival
    pub fn watch_interface<O>(
        host: H,
        filter: MatchFilter,
        interface_index: usize,
        observer: O,
    ) -> Result<Self, UsbError>
    where
        O: DeviceObserver<H> + Send + 'static,
    {
        let observer: SharedObserver<O> = Arc::new(Mutex::new(observer));

        let on_arrival = {
            let host = host.clone();
            let observer = Arc::clone(&observer);
            move |services| dispatch_arrivals(&host, &observer, services, interface_index)
        };
        let on_departure = {
            let host = host.clone();
            let observer = Arc::clone(&observer);
            move |services| dispatch_departures(&host, &observer, services)
        };

        let (arrival, arrivals) = host.watch(WatchKind::Arrival, filter, Box::new(on_arrival))?;
        // Dropping `arrival` on error uninstalls it again
        let (departure, departures) =
            host.watch(WatchKind::Departure, filter, Box::new(on_departure))?;

        info!("Watching for {}", filter);

        dispatch_arrivals(&host, &observer, arrivals, interface_index);
        dispatch_departures(&host, &observer, departures);

        Ok(Self {
            filter,
            arrival: Some(arrival),
            departure: Some(departure),
        })
    }

    pub fn filter(&self) -> MatchFilter {
        self.filter
    }

    pub fn is_active(&self) -> bool {
        self.arrival.is_some() || self.departure.is_some()
    }

    /// Uninstall both watches; later calls do nothing
    pub fn stop(&mut self) {
        if !self.is_active() {
            return;
        }
        self.arrival = None;
        self.departure = None;
        info!("Stopped watching for {}", self.filter);
    }
}

impl<H: UsbHost> Drop for Dispatcher<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_arrivals<H, O>(
    host: &H,
    observer: &SharedObserver<O>,
    services: Vec<H::Service>,
    interface_index: usize,
) where
    H: UsbHost,
    O: DeviceObserver<H>,
{
    for service in services {
        let mut connection = Connection::new(host.clone());
        match connection.open_service_interface(service, interface_index) {
            Ok(()) => {
                debug!(
                    "Delivering connection {}",
                    connection
                        .identity()
                        .map(|i| i.to_string())
                        .unwrap_or_default()
                );
                let mut observer = observer.lock().unwrap_or_else(PoisonError::into_inner);
                observer.on_connected(connection);
            }
            Err(e) => warn!("Failed to open arriving device: {}", e),
        }
    }
}

fn dispatch_departures<H, O>(host: &H, observer: &SharedObserver<O>, services: Vec<H::Service>)
where
    H: UsbHost,
    O: DeviceObserver<H>,
{
    for service in services {
        match host.identity_of(&service) {
            Ok(identity) => {
                debug!("Device {} departed", identity);
                let mut observer = observer.lock().unwrap_or_else(PoisonError::into_inner);
                observer.on_disconnected(identity);
            }
            Err(e) => warn!("Failed to read identity of departed device: {}", e),
        }
        // Service reference released here either way
    }
}
