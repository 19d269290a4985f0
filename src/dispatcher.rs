//! C3: routes assembled messages to whichever subscriber's predicate
//! matches, in registration order.

use crate::message::ControlMessage;

pub type Predicate = Box<dyn Fn(&ControlMessage) -> bool + Send>;
pub type Handler = Box<dyn FnMut(&ControlMessage) + Send>;

/// A token returned by [`Dispatcher::register`] that deregisters the
/// handler when passed to [`Dispatcher::deregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    predicate: Predicate,
    handler: Handler,
}

/// A list of `(predicate, handler)` pairs, evaluated in registration order
/// against every assembled message.
#[derive(Default)]
pub struct Dispatcher {
    registrations: Vec<Registration>,
    next_id: u64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, predicate: Predicate, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.registrations.push(Registration {
            id,
            predicate,
            handler,
        });
        id
    }

    pub fn deregister(&mut self, id: SubscriptionId) {
        self.registrations.retain(|r| r.id != id);
    }

    /// Evaluates every registered predicate against `message`, invoking
    /// every handler whose predicate matches.
    pub fn dispatch(&mut self, message: &ControlMessage) {
        for registration in &mut self.registrations {
            if (registration.predicate)(message) {
                (registration.handler)(message);
            }
        }
    }
}
