//! Command registration metadata and the GUI collaborator it is fed to

use std::collections::BTreeMap;

use crate::ops;

/// Description of one user-invokable command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandData {
    pub id: String,
    /// Display name
    pub name: String,
    /// Type name the handler is created from (see `CommandRegistry`)
    pub handler: String,
    /// Key accelerator, e.g. "F5"
    pub key: Option<String>,
    /// Icon locator, resolved by the GUI
    pub icon: Option<String>,
    pub hint: Option<String>,
}

impl CommandData {
    pub fn new(id: impl Into<String>, name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            handler: handler.into(),
            key: None,
            icon: None,
            hint: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// The GUI side that turns command metadata into actions, menus and toolbar items
pub trait GuiBuilder {
    type Icon;

    /// Register a command together with its icon, if one could be created
    fn register_command(&mut self, command: &CommandData, icon: Option<Self::Icon>);

    fn add_menu(&mut self, name: &str, command_ids: &[String]);

    fn add_toolbar_items(&mut self, command_ids: &[String]);

    /// Load an icon; `None` if the locator cannot be resolved
    fn create_icon(&mut self, locator: &str) -> Option<Self::Icon>;
}

/// Commands, menus and toolbar layout of the application
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    commands: Vec<CommandData>,
    menus: BTreeMap<String, Vec<String>>,
    toolbar: Vec<String>,
}

impl CommandCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the built-in commands
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.add_command(
            CommandData::new("copy", "Copy", ops::COPY)
                .with_key("F5")
                .with_icon("icons/copy.png")
                .with_hint("Copy selected files to the other panel"),
        );
        catalog.add_command(
            CommandData::new("zip", "Compress", ops::ZIP)
                .with_key("Alt+F5")
                .with_icon("icons/zip.png")
                .with_hint("Pack selected files into an archive"),
        );
        catalog.add_command(
            CommandData::new("mkdir", "New folder", ops::NEW_DIRECTORY)
                .with_key("F7")
                .with_icon("icons/folder-new.png")
                .with_hint("Create a directory in the current panel"),
        );
        catalog.add_command(
            CommandData::new("size", "Calculate size", ops::CALCULATE_SIZE)
                .with_key("Space")
                .with_hint("Compute the size of the selected directory"),
        );
        catalog.add_menu("File", ["copy", "zip", "mkdir"]);
        catalog.add_menu("Show", ["size"]);
        catalog.set_toolbar(["copy", "zip", "mkdir"]);
        catalog
    }

    /// Add a command, replacing one with the same id
    pub fn add_command(&mut self, command: CommandData) {
        match self.commands.iter_mut().find(|c| c.id == command.id) {
            Some(existing) => *existing = command,
            None => self.commands.push(command),
        }
    }

    pub fn add_menu<I, S>(&mut self, name: &str, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.menus
            .entry(name.to_string())
            .or_default()
            .extend(ids.into_iter().map(Into::into));
    }

    pub fn set_toolbar<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.toolbar = ids.into_iter().map(Into::into).collect();
    }

    pub fn command(&self, id: &str) -> Option<&CommandData> {
        self.commands.iter().find(|c| c.id == id)
    }

    pub fn commands(&self) -> &[CommandData] {
        &self.commands
    }

    /// Command bound to a key accelerator
    pub fn by_key(&self, key: &str) -> Option<&CommandData> {
        self.commands
            .iter()
            .find(|c| c.key.as_deref().is_some_and(|k| k.eq_ignore_ascii_case(key)))
    }

    /// Feed everything to the GUI: commands first, then menus, then the toolbar
    pub fn install<B: GuiBuilder>(&self, builder: &mut B) {
        for command in &self.commands {
            let icon = command.icon.as_deref().and_then(|locator| {
                let icon = builder.create_icon(locator);
                if icon.is_none() {
                    tracing::warn!(command = %command.id, locator, "failed to load icon");
                }
                icon
            });
            builder.register_command(command, icon);
        }
        for (name, ids) in &self.menus {
            let known = self.known_ids(ids);
            builder.add_menu(name, &known);
        }
        if !self.toolbar.is_empty() {
            let known = self.known_ids(&self.toolbar);
            builder.add_toolbar_items(&known);
        }
    }

    fn known_ids(&self, ids: &[String]) -> Vec<String> {
        ids.iter()
            .filter(|id| {
                let known = self.command(id).is_some();
                if !known {
                    tracing::warn!(command = %id, "layout references unknown command");
                }
                known
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        registered: Vec<(String, Option<String>)>,
        menus: Vec<(String, Vec<String>)>,
        toolbar: Vec<String>,
    }

    impl GuiBuilder for Recorder {
        type Icon = String;

        fn register_command(&mut self, command: &CommandData, icon: Option<String>) {
            self.registered.push((command.id.clone(), icon));
        }

        fn add_menu(&mut self, name: &str, command_ids: &[String]) {
            self.menus.push((name.to_string(), command_ids.to_vec()));
        }

        fn add_toolbar_items(&mut self, command_ids: &[String]) {
            self.toolbar.extend_from_slice(command_ids);
        }

        fn create_icon(&mut self, locator: &str) -> Option<String> {
            // Pretend only the copy icon ships with the application
            (locator == "icons/copy.png").then(|| format!("loaded:{locator}"))
        }
    }

    #[test]
    fn test_install_builtin() {
        let mut gui = Recorder::default();
        CommandCatalog::builtin().install(&mut gui);

        assert_eq!(gui.registered.len(), 4);
        assert_eq!(
            gui.registered[0],
            ("copy".to_string(), Some("loaded:icons/copy.png".to_string()))
        );
        assert_eq!(gui.registered[1], ("zip".to_string(), None));
        assert_eq!(gui.toolbar, vec!["copy", "zip", "mkdir"]);
        assert!(gui.menus.iter().any(|(name, ids)| name == "File" && ids.len() == 3));
    }

    #[test]
    fn test_unknown_ids_are_dropped_from_layout() {
        let mut catalog = CommandCatalog::new();
        catalog.add_command(CommandData::new("copy", "Copy", ops::COPY));
        catalog.add_menu("File", ["copy", "format-disk"]);

        let mut gui = Recorder::default();
        catalog.install(&mut gui);
        assert_eq!(gui.menus, vec![("File".to_string(), vec!["copy".to_string()])]);
        assert!(gui.toolbar.is_empty());
    }

    #[test]
    fn test_lookup_by_key() {
        let catalog = CommandCatalog::builtin();
        assert_eq!(catalog.by_key("f7").map(|c| c.id.as_str()), Some("mkdir"));
        assert!(catalog.by_key("F12").is_none());
    }

    #[test]
    fn test_add_command_replaces_same_id() {
        let mut catalog = CommandCatalog::builtin();
        catalog.add_command(CommandData::new("copy", "Duplicate", ops::COPY));
        assert_eq!(catalog.commands().len(), 4);
        assert_eq!(catalog.command("copy").unwrap().name, "Duplicate");
    }
}
