//! Device arrival and departure observers

use crate::connection::Connection;
use crate::host::UsbHost;
use protocol::DeviceIdentity;

/// Receives the results of a [`Dispatcher`](crate::Dispatcher) watch
///
/// Connections handed to `on_connected` belong to the observer; the
/// dispatcher never closes them. Departures carry only the identity because
/// the device itself is already gone.
///
/// Both methods run with the dispatcher's observer lock held. Pumping host
/// events from inside them (for example `RusbHost::handle_events`) can
/// re-enter the dispatcher on the same thread and deadlock.
pub trait DeviceObserver<H: UsbHost> {
    fn on_connected(&mut self, connection: Connection<H>);

    fn on_disconnected(&mut self, identity: DeviceIdentity);
}

/// Observer built from two closures
pub struct FnObserver<C, D> {
    on_connected: C,
    on_disconnected: D,
}

/// Build an observer from a connect closure and a disconnect closure
pub fn observer_fn<C, D>(on_connected: C, on_disconnected: D) -> FnObserver<C, D> {
    FnObserver {
        on_connected,
        on_disconnected,
    }
}

impl<H, C, D> DeviceObserver<H> for FnObserver<C, D>
where
    H: UsbHost,
    C: FnMut(Connection<H>),
    D: FnMut(DeviceIdentity),
{
    fn on_connected(&mut self, connection: Connection<H>) {
        (self.on_connected)(connection)
    }

    fn on_disconnected(&mut self, identity: DeviceIdentity) {
        (self.on_disconnected)(identity)
    }
}
