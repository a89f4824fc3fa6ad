use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use hermod_common::plugin;
use hermod_tracing::traced;
use libloading::Library;
use parking_lot::Mutex;

use crate::{
    error::PluginError,
    native::{ENTRY_SYMBOL, EntryFn, NativePlugin},
    plugin::{Plugin, PluginHost, PluginSignal, TalkOutcome},
    registry::Terminal,
    services::{Capacity, Identity, ServiceDirectory, ServiceRef, Services},
};

struct Record {
    name: Arc<str>,
    plugin: Arc<dyn Plugin>,
    references: Vec<ServiceRef>,
}

#[derive(Default)]
struct Lists {
    active: Vec<Record>,
    unloading: Vec<Record>,
}

/// Loads, unloads and reclaims plugins.
///
/// `control` serialises the lifecycle operations against each other, `lists`
/// is only held long enough to move records around so a plugin's init and
/// free run without it.
pub struct PluginManager {
    services: Arc<Services>,
    plugin_dir: PathBuf,
    control: Mutex<()>,
    lists: Mutex<Lists>,
}

/// The file name a plugin is known by.
fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

impl PluginManager {
    #[must_use]
    pub fn new(
        identity: Identity,
        capacity: Capacity,
        plugin_dir: impl Into<PathBuf>,
        directory: Arc<dyn ServiceDirectory>,
    ) -> Self {
        Self {
            services: Arc::new(Services::new(identity, capacity, directory)),
            plugin_dir: plugin_dir.into(),
            control: Mutex::new(()),
            lists: Mutex::default(),
        }
    }

    #[must_use]
    pub const fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Open the shared object at `path` and run its init.
    ///
    /// A path without a directory component is tried as given, then relative
    /// to the plugin directory.
    ///
    /// # Errors
    ///
    /// [`PluginError::AlreadyLoaded`] if a plugin of that name is loaded, in
    /// the middle of unloading, or provides a delivery hook. Otherwise the
    /// library could not be opened, has no entry point, or its init failed.
    #[traced(instrument(level = tracing::Level::TRACE, skip(self)), timing(precision = "us"))]
    pub fn load(&self, path: &str) -> Result<(), PluginError> {
        let _control = self.control.lock();
        self.clean_locked();

        let name: Arc<str> = Arc::from(base_name(path));
        self.check_loadable(path, &name)?;

        let library = Arc::new(self.open(path)?);
        let entry: EntryFn = unsafe {
            *library
                .get::<EntryFn>(ENTRY_SYMBOL)
                .map_err(|_| PluginError::NoEntryPoint {
                    path: path.to_owned(),
                    symbol: "HOOK_LibMain",
                })?
        };

        let plugin = unsafe { NativePlugin::new(entry, Some(Arc::clone(&library))) };
        self.start(name, Arc::new(plugin), Some(library))
    }

    /// Initialise an in-process plugin under `name`.
    ///
    /// # Errors
    ///
    /// As [`PluginManager::load`], minus the library errors.
    pub fn add(&self, name: &str, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let _control = self.control.lock();
        self.clean_locked();

        let name: Arc<str> = Arc::from(name);
        self.check_loadable(&name, &name)?;
        self.start(name, plugin, None)
    }

    fn check_loadable(&self, path: &str, name: &str) -> Result<(), PluginError> {
        let registry = self.services.registry();
        let is_terminal = [Terminal::Local, Terminal::Remote].into_iter().any(|which| {
            registry
                .terminal_owner(which)
                .is_some_and(|owner| *owner == *name || *owner == *path)
        });

        let lists = self.lists.lock();
        let is_listed = lists
            .active
            .iter()
            .chain(lists.unloading.iter())
            .any(|record| *record.name == *name);

        if is_terminal || is_listed {
            plugin!(level = WARN, "{path} is already loaded");
            return Err(PluginError::AlreadyLoaded(path.to_owned()));
        }
        Ok(())
    }

    fn open(&self, path: &str) -> Result<Library, PluginError> {
        match unsafe { Library::new(path) } {
            Ok(library) => Ok(library),
            Err(err) if !path.contains('/') => {
                let prefixed = self.plugin_dir.join(path);
                plugin!(
                    level = DEBUG,
                    "Unable to open {path} ({err}), trying {}",
                    prefixed.display()
                );
                unsafe { Library::new(&prefixed) }.map_err(|source| PluginError::Open {
                    path: prefixed.display().to_string(),
                    source,
                })
            }
            Err(source) => Err(PluginError::Open {
                path: path.to_owned(),
                source,
            }),
        }
    }

    fn start(
        &self,
        name: Arc<str>,
        plugin: Arc<dyn Plugin>,
        library: Option<Arc<Library>>,
    ) -> Result<(), PluginError> {
        self.services.begin_load(Arc::clone(&name), library);
        let ok = plugin.init(&mut PluginHost::new(&self.services));
        let references = self
            .services
            .end_load()
            .map(|load| load.references)
            .unwrap_or_default();

        let record = Record {
            name: Arc::clone(&name),
            plugin,
            references,
        };

        if ok {
            plugin!(level = INFO, "Loaded {name}");
            self.lists.lock().active.push(record);
            Ok(())
        } else {
            plugin!(level = ERROR, "Init of {name} failed");
            self.retire(record);
            self.clean_locked();
            Err(PluginError::Init(name.to_string()))
        }
    }

    /// Signal free, invalidate the plugin's hooks and park it until nothing
    /// executes them any more.
    fn retire(&self, record: Record) {
        record.plugin.notify(PluginSignal::Free);
        self.services.registry().invalidate_owner(&record.name);
        self.services.drop_talk(&record.name);
        plugin!(level = DEBUG, "{} is unloading", record.name);
        self.lists.lock().unloading.push(record);
    }

    /// Start unloading the plugin whose file name matches `path`'s.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotFound`] if no such plugin is loaded,
    /// [`PluginError::OwnsTerminal`] if it provides a delivery hook.
    #[traced(instrument(level = tracing::Level::TRACE, skip(self)), timing(precision = "us"))]
    pub fn unload(&self, path: &str) -> Result<(), PluginError> {
        let _control = self.control.lock();
        self.clean_locked();

        let name = base_name(path);
        let registry = self.services.registry();
        for which in [Terminal::Local, Terminal::Remote] {
            if registry
                .terminal_owner(which)
                .is_some_and(|owner| *owner == *name)
            {
                plugin!(level = WARN, "Refusing to unload {name}");
                return Err(PluginError::OwnsTerminal(name.to_owned(), which.as_str()));
            }
        }

        let record = {
            let mut lists = self.lists.lock();
            let position = lists
                .active
                .iter()
                .position(|record| *record.name == *name)
                .ok_or_else(|| PluginError::NotFound(name.to_owned()))?;
            lists.active.remove(position)
        };

        self.retire(record);
        Ok(())
    }

    /// Destroy every unloading plugin none of whose hooks are executing.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "us"))]
    pub fn clean_pending(&self) {
        let _control = self.control.lock();
        self.clean_locked();
    }

    fn clean_locked(&self) {
        let registry = self.services.registry();
        let reclaimable = {
            let mut lists = self.lists.lock();
            let (quiet, busy) = std::mem::take(&mut lists.unloading)
                .into_iter()
                .partition::<Vec<_>, _>(|record| registry.is_quiescent(&record.name));
            lists.unloading = busy;
            quiet
        };

        for record in reclaimable {
            registry.reclaim(&record.name);
            self.services.release(&record.name, &record.references);
            plugin!(level = INFO, "Unloaded {}", record.name);
        }
    }

    /// One line per plugin: `<name>\t\t--local|--remote|--normal|--unloading`.
    pub fn enum_plugins(&self) -> Vec<String> {
        let _control = self.control.lock();
        self.clean_locked();

        let registry = self.services.registry();
        let local = registry.terminal_owner(Terminal::Local);
        let remote = registry.terminal_owner(Terminal::Remote);
        let owns = |owner: &Option<Arc<str>>, name: &str| owner.as_deref() == Some(name);

        let lists = self.lists.lock();
        let active = lists.active.iter().map(|record| {
            let role = if owns(&local, &record.name) {
                "local"
            } else if owns(&remote, &record.name) {
                "remote"
            } else {
                "normal"
            };
            format!("{}\t\t--{role}", record.name)
        });
        let unloading = lists
            .unloading
            .iter()
            .map(|record| format!("{}\t\t--unloading", record.name));

        active.chain(unloading).collect()
    }

    /// Hand a console command to the plugin named by `args[0]`.
    pub fn console_talk(&self, args: &[&str]) -> TalkOutcome {
        let Some(&name) = args.first() else {
            return TalkOutcome::NoFile;
        };

        if !self.lists.lock().active.iter().any(|record| *record.name == *name) {
            return TalkOutcome::NoFile;
        }

        self.services
            .talk(name)
            .map_or(TalkOutcome::NoTalk, |talk| TalkOutcome::TalkOk(talk.talk(args)))
    }

    /// Deliver `signal` to every active plugin.
    pub fn notify_all(&self, signal: PluginSignal) {
        let plugins: Vec<_> = self
            .lists
            .lock()
            .active
            .iter()
            .map(|record| Arc::clone(&record.plugin))
            .collect();

        for plugin in plugins {
            plugin.notify(signal);
        }
    }

    /// # Errors
    ///
    /// [`PluginError::MissingTerminal`] naming the first delivery hook no
    /// plugin provides.
    pub fn check_terminals(&self) -> Result<(), PluginError> {
        let registry = self.services.registry();
        for which in [Terminal::Local, Terminal::Remote] {
            if registry.terminal_owner(which).is_none() {
                return Err(PluginError::MissingTerminal(which.as_str()));
            }
        }
        Ok(())
    }

    /// Names of the active plugins in load order.
    pub fn plugins(&self) -> Vec<Arc<str>> {
        self.lists
            .lock()
            .active
            .iter()
            .map(|record| Arc::clone(&record.name))
            .collect()
    }

    /// Unload everything, delivery hook owners included, in reverse load
    /// order.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "us"))]
    pub fn stop(&self) {
        let _control = self.control.lock();

        let active = std::mem::take(&mut self.lists.lock().active);
        for record in active.into_iter().rev() {
            self.retire(record);
        }
        self.clean_locked();

        let remaining = self.lists.lock().unloading.len();
        if remaining > 0 {
            plugin!(
                level = WARN,
                "{remaining} plugin(s) still have hooks executing and were not unloaded"
            );
        }
    }
}
