//! Component Arena
//!
//! Components of one session, addressed by integer handles. Handles are
//! never reused, and iteration follows handle order.

use super::ClientCall;
use crate::communication::UpdateBatch;
use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Handle of a component within its session
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ComponentId(u32);

impl ComponentId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something the client talks to
pub trait Component: Send + 'static {
    /// Apply one client call
    fn handle_call(&mut self, call: ClientCall) -> Result<()>;

    /// Turn accumulated changes into a batch for the client
    fn flush(&mut self) -> Option<UpdateBatch>;

    /// The client lost its state; resend everything on the next flush
    fn reset_client(&mut self);

    /// Id of the most recent batch this component produced
    fn last_update_id(&self) -> u64;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Owned components of a session
#[derive(Default)]
pub struct ComponentArena {
    slots: Vec<Option<Box<dyn Component>>>,
}

impl ComponentArena {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn insert(&mut self, component: impl Component) -> ComponentId {
        let id = ComponentId(self.slots.len() as u32);
        self.slots.push(Some(Box::new(component)));
        id
    }

    pub fn remove(&mut self, id: ComponentId) -> Option<Box<dyn Component>> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.slots.get(id.index()).is_some_and(Option::is_some)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_dyn(&self, id: ComponentId) -> Option<&dyn Component> {
        self.slots.get(id.index())?.as_deref()
    }

    pub fn get_dyn_mut(&mut self, id: ComponentId) -> Option<&mut (dyn Component + 'static)> {
        self.slots.get_mut(id.index())?.as_deref_mut()
    }

    /// Typed access to a component
    pub fn get<C: Component>(&self, id: ComponentId) -> Result<&C> {
        self.get_dyn(id)
            .ok_or_else(|| Error::invalid_state(format!("No component {id}")))?
            .as_any()
            .downcast_ref::<C>()
            .ok_or_else(|| Error::invalid_state(format!("Component {id} has a different type")))
    }

    /// Typed mutable access to a component
    pub fn get_mut<C: Component>(&mut self, id: ComponentId) -> Result<&mut C> {
        self.get_dyn_mut(id)
            .ok_or_else(|| Error::invalid_state(format!("No component {id}")))?
            .as_any_mut()
            .downcast_mut::<C>()
            .ok_or_else(|| Error::invalid_state(format!("Component {id} has a different type")))
    }

    /// Live components in handle order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ComponentId, &mut (dyn Component + 'static))> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            slot.as_deref_mut()
                .map(|component| (ComponentId(index as u32), component))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Component that records calls and emits a batch per flush when dirty
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub calls: Vec<ClientCall>,
        pub next_update: u64,
        pub dirty: bool,
        pub resets: usize,
    }

    impl Component for Recorder {
        fn handle_call(&mut self, call: ClientCall) -> Result<()> {
            if let ClientCall::Select { key } = &call
                && key == "missing"
            {
                return Err(Error::UnknownKey { key: key.clone() });
            }
            self.calls.push(call);
            self.dirty = true;
            Ok(())
        }

        fn flush(&mut self) -> Option<UpdateBatch> {
            if !std::mem::take(&mut self.dirty) {
                return None;
            }
            self.next_update += 1;
            Some(UpdateBatch {
                update_id: self.next_update,
                ops: vec![crate::communication::UpdateOp::Confirm {
                    update_id: self.next_update,
                }],
            })
        }

        fn reset_client(&mut self) {
            self.resets += 1;
            self.dirty = true;
        }

        fn last_update_id(&self) -> u64 {
            self.next_update
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_handles_are_not_reused() {
        let mut arena = ComponentArena::new();
        let a = arena.insert(Recorder::default());
        let b = arena.insert(Recorder::default());
        assert!(arena.remove(a).is_some());
        let c = arena.insert(Recorder::default());
        assert_ne!(a, c);
        assert!(!arena.contains(a));
        assert_eq!(arena.len(), 2);
        let order: Vec<_> = arena.iter_mut().map(|(id, _)| id).collect();
        assert_eq!(order, vec![b, c]);
    }

    #[test]
    fn test_typed_access() {
        struct Other;
        impl Component for Other {
            fn handle_call(&mut self, _call: ClientCall) -> Result<()> {
                Ok(())
            }
            fn flush(&mut self) -> Option<UpdateBatch> {
                None
            }
            fn reset_client(&mut self) {}
            fn last_update_id(&self) -> u64 {
                0
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }

        let mut arena = ComponentArena::new();
        let id = arena.insert(Recorder::default());
        arena
            .get_mut::<Recorder>(id)
            .expect("recorder")
            .handle_call(ClientCall::SelectAll)
            .expect("call");
        assert_eq!(arena.get::<Recorder>(id).expect("recorder").calls.len(), 1);
        assert!(matches!(
            arena.get::<Other>(id),
            Err(Error::InvalidState { .. })
        ));
        assert!(arena.get::<Recorder>(ComponentId::new(9)).is_err());
    }
}
