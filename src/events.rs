//! Change notifications, so that a layers panel can follow the document without polling it.

use crate::{
    document::Location,
    history::EditCommand,
    layer::{LayerId, PropertyKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerEvent {
    Added { id: LayerId, at: Location },
    Removed { id: LayerId, at: Location },
    Reordered { id: LayerId, from: Location, to: Location },
    PropertyChanged { id: LayerId, property: PropertyKind },
}

impl LayerEvent {
    /// The event describing what `command` just did
    pub fn from_command(command: &EditCommand) -> Self {
        match command {
            EditCommand::AddLayer { id, at } => Self::Added { id: *id, at: *at },
            EditCommand::RemoveLayer { id, at } => Self::Removed { id: *id, at: *at },
            EditCommand::MoveLayer { id, from, to } => Self::Reordered {
                id: *id,
                from: *from,
                to: *to,
            },
            EditCommand::SetProperty { id, new, .. } => Self::PropertyChanged {
                id: *id,
                property: new.kind(),
            },
            EditCommand::PaintMask { id, .. } => Self::PropertyChanged {
                id: *id,
                property: PropertyKind::Mask,
            },
        }
    }

    pub fn layer(&self) -> LayerId {
        match self {
            Self::Added { id, .. }
            | Self::Removed { id, .. }
            | Self::Reordered { id, .. }
            | Self::PropertyChanged { id, .. } => *id,
        }
    }
}

/// Receives [`LayerEvent`]s.  Every method defaults to doing nothing, so listeners only implement
/// what they care about.
pub trait LayerListener: Send {
    fn on_layer_added(&mut self, _id: LayerId, _at: Location) {}
    fn on_layer_removed(&mut self, _id: LayerId, _at: Location) {}
    fn on_layer_reordered(&mut self, _id: LayerId, _from: Location, _to: Location) {}
    fn on_property_changed(&mut self, _id: LayerId, _property: PropertyKind) {}

    /// Dispatches `event` to the matching method
    fn notify(&mut self, event: &LayerEvent) {
        match *event {
            LayerEvent::Added { id, at } => self.on_layer_added(id, at),
            LayerEvent::Removed { id, at } => self.on_layer_removed(id, at),
            LayerEvent::Reordered { id, from, to } => self.on_layer_reordered(id, from, to),
            LayerEvent::PropertyChanged { id, property } => self.on_property_changed(id, property),
        }
    }
}

/// Any closure taking events can be used as a listener
impl<F: FnMut(&LayerEvent) + Send> LayerListener for F {
    fn notify(&mut self, event: &LayerEvent) {
        self(event)
    }
}
