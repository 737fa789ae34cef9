//! Undo/redo, as a bounded list of invertible edit commands.

use std::collections::VecDeque;

use crate::{
    document::{Document, Location},
    error::{Error, Result},
    layer::{LayerId, Property, PropertyKind},
    mask::Mask,
};

/// A single reversible change to a [`Document`]
#[derive(Debug, Clone, PartialEq)]
pub enum EditCommand {
    /// Put the (already created but detached) layer `id` into the tree
    AddLayer { id: LayerId, at: Location },
    /// Take layer `id` out of the tree, from where it currently is at `at`
    RemoveLayer { id: LayerId, at: Location },
    /// Move layer `id`, either within its stack (a reorder) or into another group.  `to` is the
    /// location after the move.
    MoveLayer {
        id: LayerId,
        from: Location,
        to: Location,
    },
    /// Change one property of a layer
    SetProperty {
        id: LayerId,
        old: Property,
        new: Property,
    },
    /// A completed brush stroke on a layer's mask
    PaintMask {
        id: LayerId,
        before: Option<Mask>,
        after: Option<Mask>,
    },
}

impl EditCommand {
    /// Applies this command to `doc`.  On error, `doc` is unchanged.
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        match self {
            Self::AddLayer { id, at } => doc.attach(*id, *at),
            Self::RemoveLayer { id, at } => {
                let current = doc.location(*id)?;
                if current != *at {
                    return Err(Error::InvalidStructure(format!(
                        "{:?} was expected at {:?} but is at {:?}",
                        id, at, current
                    )));
                }
                doc.detach(*id).map(|_| ())
            }
            Self::MoveLayer { id, from, to } => {
                let old = doc.detach(*id)?;
                debug_assert_eq!(old, *from);
                if let Err(e) = doc.attach(*id, *to) {
                    // Put it back, so that a failed move has no effect
                    doc.attach(*id, old)?;
                    return Err(e);
                }
                Ok(())
            }
            Self::SetProperty { id, new, .. } => doc.set_property(*id, new.clone()).map(|_| ()),
            Self::PaintMask { id, after, .. } => {
                doc.set_property(*id, Property::Mask(after.clone())).map(|_| ())
            }
        }
    }

    /// The command which undoes this one
    pub fn inverse(&self) -> EditCommand {
        match self.clone() {
            Self::AddLayer { id, at } => Self::RemoveLayer { id, at },
            Self::RemoveLayer { id, at } => Self::AddLayer { id, at },
            Self::MoveLayer { id, from, to } => Self::MoveLayer {
                id,
                from: to,
                to: from,
            },
            Self::SetProperty { id, old, new } => Self::SetProperty {
                id,
                old: new,
                new: old,
            },
            Self::PaintMask { id, before, after } => Self::PaintMask {
                id,
                before: after,
                after: before,
            },
        }
    }

    /// The layer which this command changes
    pub fn layer(&self) -> LayerId {
        match self {
            Self::AddLayer { id, .. }
            | Self::RemoveLayer { id, .. }
            | Self::MoveLayer { id, .. }
            | Self::SetProperty { id, .. }
            | Self::PaintMask { id, .. } => *id,
        }
    }

    /// Every layer which this command refers to, including the groups it moves layers between
    pub fn referenced_layers(&self) -> Vec<LayerId> {
        let mut ids = vec![self.layer()];
        let mut push_parent = |loc: &Location| ids.extend(loc.parent);
        match self {
            Self::AddLayer { at, .. } | Self::RemoveLayer { at, .. } => push_parent(at),
            Self::MoveLayer { from, to, .. } => {
                push_parent(from);
                push_parent(to);
            }
            Self::SetProperty { .. } | Self::PaintMask { .. } => {}
        }
        ids
    }
}

/// What's being changed by an open edit session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// A brush stroke on the layer's mask
    PaintMask,
    /// Continuous changes to one property (e.g. dragging a slider)
    Property(PropertyKind),
}

impl EditKind {
    fn property(self) -> PropertyKind {
        match self {
            Self::PaintMask => PropertyKind::Mask,
            Self::Property(kind) => kind,
        }
    }
}

/// Whether or not an edit session is open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    Clean,
    Editing,
}

/// An open edit session: the value that the property had when the session started, so that the
/// whole session can become one command (or be cancelled)
#[derive(Debug, Clone)]
pub struct PendingEdit {
    pub kind: EditKind,
    pub layer: LayerId,
    before: Property,
}

/// Linear undo/redo history.
///
/// Commands `0..cursor` have been applied and can be undone; `cursor..` have been undone and can be
/// redone.  Recording a new command discards the redo tail.  The history holds at most `limit`
/// commands: the oldest are dropped once it's full, after which undoing past them reports
/// [`Error::HistoryTruncated`].
#[derive(Debug, Clone)]
pub struct HistoryManager {
    commands: VecDeque<EditCommand>,
    cursor: usize,
    limit: usize,
    /// Total number of commands dropped off the front
    evicted: usize,
    pending: Option<PendingEdit>,
}

impl HistoryManager {
    pub fn new(limit: usize) -> Self {
        Self {
            commands: VecDeque::new(),
            cursor: 0,
            limit,
            evicted: 0,
            pending: None,
        }
    }

    pub fn state(&self) -> HistoryState {
        match self.pending {
            Some(_) => HistoryState::Editing,
            None => HistoryState::Clean,
        }
    }

    pub fn pending(&self) -> Option<&PendingEdit> {
        self.pending.as_ref()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.commands.len()
    }

    /// `true` once commands have been dropped to stay within the limit
    pub fn is_truncated(&self) -> bool {
        self.evicted > 0
    }

    /// Returns `true` if any retained command refers to `id`, i.e. `id` might be brought back into
    /// the tree by undo or redo
    pub fn references(&self, id: LayerId) -> bool {
        self.commands
            .iter()
            .any(|cmd| cmd.referenced_layers().contains(&id))
    }

    /// Applies `command` to `doc` and records it.  Returns the commands which were dropped from
    /// the history as a result (the old redo tail, and any evicted to stay within the limit).
    pub fn execute(&mut self, command: EditCommand, doc: &mut Document) -> Result<Vec<EditCommand>> {
        command.apply(doc)?;
        Ok(self.record(command))
    }

    /// Records a command which has already been applied
    pub fn record(&mut self, command: EditCommand) -> Vec<EditCommand> {
        let mut dropped = self.commands.split_off(self.cursor).into_iter().collect::<Vec<_>>();
        self.commands.push_back(command);
        self.cursor += 1;
        let redo_tail = dropped.len();
        while self.commands.len() > self.limit {
            if let Some(oldest) = self.commands.pop_front() {
                dropped.push(oldest);
                self.cursor -= 1;
                self.evicted += 1;
            }
        }
        if redo_tail > 0 {
            log::debug!("Discarded {} undone commands", redo_tail);
        }
        if dropped.len() > redo_tail {
            log::info!(
                "History limit of {} reached; {} commands can no longer be undone",
                self.limit,
                self.evicted
            );
        }
        dropped
    }

    /// Opens an edit session on one property of `layer`, remembering its current value
    pub fn begin(&mut self, kind: EditKind, layer: LayerId, doc: &Document) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::EditInProgress);
        }
        let before = doc
            .layer(layer)?
            .get(kind.property())
            .ok_or_else(|| Error::InvalidStructure(format!("{:?} has no {:?}", layer, kind)))?;
        self.pending = Some(PendingEdit {
            kind,
            layer,
            before,
        });
        Ok(())
    }

    /// Closes the edit session, turning everything it changed into a single command.  Returns the
    /// recorded command (if the session changed anything) and the commands that were dropped to
    /// make room for it.
    pub fn commit(&mut self, doc: &Document) -> (Option<EditCommand>, Vec<EditCommand>) {
        let pending = match self.pending.take() {
            Some(p) => p,
            None => return (None, Vec::new()),
        };
        let after = match doc.layer(pending.layer).ok().and_then(|l| l.get(pending.before.kind())) {
            Some(after) => after,
            None => return (None, Vec::new()),
        };
        if after == pending.before {
            return (None, Vec::new());
        }
        let command = match (pending.kind, pending.before, after) {
            (EditKind::PaintMask, Property::Mask(before), Property::Mask(after)) => {
                EditCommand::PaintMask {
                    id: pending.layer,
                    before,
                    after,
                }
            }
            (_, old, new) => EditCommand::SetProperty {
                id: pending.layer,
                old,
                new,
            },
        };
        let dropped = self.record(command.clone());
        (Some(command), dropped)
    }

    /// Closes the edit session, putting the property back how it was when the session started.
    /// Returns the layer which was restored.
    pub fn cancel(&mut self, doc: &mut Document) -> Result<Option<LayerId>> {
        match self.pending.take() {
            Some(pending) => {
                doc.set_property(pending.layer, pending.before)?;
                Ok(Some(pending.layer))
            }
            None => Ok(None),
        }
    }

    /// Undoes the most recent command, returning the command that was applied to do so (`None` if
    /// there's nothing to undo).  An open edit session is cancelled instead.
    pub fn undo(&mut self, doc: &mut Document) -> Result<Option<EditCommand>> {
        if self.pending.is_some() {
            self.cancel(doc)?;
            return Ok(None);
        }
        if self.cursor == 0 {
            return match self.evicted {
                0 => Ok(None),
                _ => Err(Error::HistoryTruncated),
            };
        }
        let inverse = self.commands[self.cursor - 1].inverse();
        inverse.apply(doc)?;
        self.cursor -= 1;
        Ok(Some(inverse))
    }

    /// Re-applies the most recently undone command
    pub fn redo(&mut self, doc: &mut Document) -> Result<Option<EditCommand>> {
        if self.pending.is_some() || self.cursor == self.commands.len() {
            return Ok(None);
        }
        let command = self.commands[self.cursor].clone();
        command.apply(doc)?;
        self.cursor += 1;
        Ok(Some(command))
    }
}
