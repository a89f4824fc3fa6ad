//! The shared, append-mostly list of hooks every chain walks.
//!
//! Entries are never moved: a hook keeps its slot (and with it its position
//! in dispatch order) for as long as it is registered. Unregistering only
//! clears the entry's valid flag; the slot is reused by a later registration
//! or vacated when the owning plugin is reclaimed, and in both cases only once
//! no call into the hook is in flight.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use hermod_common::plugin;
use parking_lot::Mutex;

use crate::{
    error::RegisterError,
    hook::{Hook, HookId},
};

pub struct HookEntry {
    id: HookId,
    hook: Arc<dyn Hook>,
    owner: Arc<str>,
    valid: AtomicBool,
    in_flight: AtomicUsize,
}

impl HookEntry {
    fn new(hook: Arc<dyn Hook>, owner: Arc<str>) -> Arc<Self> {
        Arc::new(Self {
            id: hook.id(),
            hook,
            owner,
            valid: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub const fn id(&self) -> HookId {
        self.id
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    fn is_free(&self) -> bool {
        !self.is_valid() && self.in_flight() == 0
    }

    /// Mark a call into the hook as started, unless it has been invalidated.
    ///
    /// The count is raised before validity is checked, so once an entry is
    /// invalid and reports zero in flight, no new call can begin.
    pub(crate) fn enter(&self) -> Option<InFlight<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.is_valid() {
            Some(InFlight(self))
        } else {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            None
        }
    }

    pub(crate) fn hook(&self) -> &dyn Hook {
        self.hook.as_ref()
    }
}

/// Held for the duration of one call into a hook.
pub(crate) struct InFlight<'a>(&'a HookEntry);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminal {
    Local,
    Remote,
}

impl Terminal {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// The two built-in delivery hooks tried, in this order, when no other hook
/// handles a message.
#[derive(Clone, Default)]
pub struct Terminals {
    pub local: Option<Arc<HookEntry>>,
    pub remote: Option<Arc<HookEntry>>,
}

impl Terminals {
    fn slot(&mut self, which: Terminal) -> &mut Option<Arc<HookEntry>> {
        match which {
            Terminal::Local => &mut self.local,
            Terminal::Remote => &mut self.remote,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<HookEntry>> {
        self.local.iter().chain(self.remote.iter())
    }
}

/// What a single dispatch pass walks.
pub struct Snapshot {
    pub hooks: Vec<Arc<HookEntry>>,
    pub terminals: Terminals,
}

#[derive(Default)]
pub struct HookRegistry {
    slots: Mutex<Vec<Option<Arc<HookEntry>>>>,
    terminals: Mutex<Terminals>,
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `hook` on behalf of `owner`.
    ///
    /// # Errors
    ///
    /// [`RegisterError::Duplicate`] if a valid registration of the same hook
    /// exists.
    pub fn register(&self, hook: Arc<dyn Hook>, owner: &Arc<str>) -> Result<HookId, RegisterError> {
        let id = hook.id();
        let mut slots = self.slots.lock();

        if slots
            .iter()
            .flatten()
            .any(|entry| entry.is_valid() && entry.id() == id)
        {
            return Err(RegisterError::Duplicate);
        }

        let entry = HookEntry::new(hook, Arc::clone(owner));
        match slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_none_or(|entry| entry.is_free()))
        {
            Some(slot) => *slot = Some(entry),
            None => slots.push(Some(entry)),
        }

        plugin!("Registered hook {id:?} for {owner}");
        Ok(id)
    }

    /// Invalidate the valid registration of `id`, returning its owner. The
    /// slot stays in place until nothing is executing the hook.
    pub fn unregister(&self, id: HookId) -> Option<Arc<str>> {
        let slots = self.slots.lock();
        let entry = slots
            .iter()
            .flatten()
            .find(|entry| entry.is_valid() && entry.id() == id)?;
        entry.invalidate();
        plugin!("Unregistered hook {id:?} of {}", entry.owner);
        Some(Arc::clone(&entry.owner))
    }

    /// # Errors
    ///
    /// [`RegisterError::TerminalTaken`] if a hook already fills this role.
    pub fn register_terminal(
        &self,
        which: Terminal,
        hook: Arc<dyn Hook>,
        owner: &Arc<str>,
    ) -> Result<HookId, RegisterError> {
        let mut terminals = self.terminals.lock();
        let slot = terminals.slot(which);
        if slot.is_some() {
            return Err(RegisterError::TerminalTaken(which.as_str()));
        }

        let entry = HookEntry::new(hook, Arc::clone(owner));
        let id = entry.id();
        *slot = Some(entry);
        plugin!(level = DEBUG, "{owner} provides the {} delivery hook", which.as_str());
        Ok(id)
    }

    /// Name of the plugin providing the given delivery hook.
    #[must_use]
    pub fn terminal_owner(&self, which: Terminal) -> Option<Arc<str>> {
        self.terminals
            .lock()
            .slot(which)
            .as_ref()
            .map(|entry| Arc::clone(&entry.owner))
    }

    /// The hooks in registration order plus the delivery hooks, captured
    /// under a short lock. Hooks registered after this returns are not part
    /// of the pass.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let hooks = self.slots.lock().iter().flatten().cloned().collect();
        let terminals = self.terminals.lock().clone();
        Snapshot { hooks, terminals }
    }

    /// Number of valid, non-terminal hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .flatten()
            .filter(|entry| entry.is_valid())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn for_owner(&self, owner: &str, mut f: impl FnMut(&Arc<HookEntry>)) {
        self.slots
            .lock()
            .iter()
            .flatten()
            .filter(|entry| *entry.owner == *owner)
            .for_each(&mut f);
        self.terminals
            .lock()
            .iter()
            .filter(|entry| *entry.owner == *owner)
            .for_each(f);
    }

    /// Invalidate every hook `owner` registered, including delivery hooks.
    pub(crate) fn invalidate_owner(&self, owner: &str) {
        self.for_owner(owner, |entry| entry.invalidate());
    }

    /// Whether nothing is executing any hook `owner` ever registered,
    /// including hooks it unregistered itself.
    pub(crate) fn is_quiescent(&self, owner: &str) -> bool {
        let mut quiet = true;
        self.for_owner(owner, |entry| quiet &= entry.in_flight() == 0);
        quiet
    }

    /// Vacate every slot `owner` holds, including its delivery hooks.
    pub(crate) fn reclaim(&self, owner: &str) {
        for slot in self.slots.lock().iter_mut() {
            if slot.as_ref().is_some_and(|entry| *entry.owner == *owner) {
                *slot = None;
            }
        }

        let mut terminals = self.terminals.lock();
        for which in [Terminal::Local, Terminal::Remote] {
            let slot = terminals.slot(which);
            if slot.as_ref().is_some_and(|entry| *entry.owner == *owner) {
                *slot = None;
            }
        }
    }
}
