//! Admin file uploads from a messaging integration.
//!
//! The integration itself (delivery, authentication, transport) lives
//! outside this crate. It hands us [`Message`]s through the two commands in
//! [`Command`]; we write the attachments into the admin's folder under the
//! watched source tree. The next poll cycle picks the new files up on its
//! own, so there is no signalling between ingestion and the controller.

use crate::config::SettingsStore;
use crate::utils::errors::{DaemonError, Result};
use bytes::Bytes;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the messaging integration tells us about senders
pub trait MessagingApi: Send + Sync {
    fn is_admin(&self, sender: &str) -> bool;
    fn get_username(&self, sender: &str) -> String;
}

/// A file attached to a message
pub trait Attachment: Send + Sync {
    fn file_name(&self) -> &str;

    /// Write the attachment into `folder`, returning the path written
    fn save(&self, folder: &Path) -> std::io::Result<PathBuf>;
}

pub struct Message {
    pub sender: String,
    pub content: Option<String>,
    pub attachments: Vec<Box<dyn Attachment>>,
}

impl Message {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Trimmed content, `None` when absent or blank
    fn argument(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Attachment whose payload has already been received
#[derive(Debug, Clone)]
pub struct MemoryAttachment {
    name: String,
    data: Bytes,
}

impl MemoryAttachment {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl Attachment for MemoryAttachment {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn save(&self, folder: &Path) -> std::io::Result<PathBuf> {
        let mut components = Path::new(&self.name).components();
        let name = match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => name,
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid attachment name: {:?}", self.name),
                ))
            }
        };

        let path = folder.join(name);
        fs::write(&path, &self.data)?;
        Ok(path)
    }
}

/// Commands exposed to the messaging integration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Backup,
    AddAdmin,
}

impl Command {
    pub const ALL: [Command; 2] = [Command::Backup, Command::AddAdmin];

    pub fn name(&self) -> &'static str {
        match self {
            Command::Backup => "Backup",
            Command::AddAdmin => "AddAdmin",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            Command::Backup => {
                "Creates a backup of the sent file in the admin user's folder.\n\
                 Usage: &Backup <additional folder name under your folder if needed> [attached file(s)]\n\
                 Category: HARDWARE"
            }
            Command::AddAdmin => {
                "Adds a folder for the admin user.\n\
                 Usage: &AddAdmin <folder name for the admin user>\n\
                 Category: HARDWARE"
            }
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Handlers for [`Command`]s. Errors are logged, never returned.
pub struct AdminCommands<A> {
    api: A,
    store: Arc<SettingsStore>,
}

impl<A: MessagingApi> AdminCommands<A> {
    pub fn new(api: A, store: Arc<SettingsStore>) -> Self {
        Self { api, store }
    }

    /// Route a command by its registered name
    pub fn dispatch(&self, command: &str, message: &Message) {
        match Command::from_name(command) {
            Some(Command::Backup) => self.backup(message),
            Some(Command::AddAdmin) => self.add_admin(message),
            None => warn!(command, sender = %message.sender, "Unknown command"),
        }
    }

    /// `Backup [subfolder]` with attachments
    pub fn backup(&self, message: &Message) {
        if let Err(e) = self.try_backup(message) {
            error!(sender = %message.sender, error = %e, "Error in receiving files");
        }
    }

    /// `AddAdmin <folder>`
    pub fn add_admin(&self, message: &Message) {
        if let Err(e) = self.try_add_admin(message) {
            error!(sender = %message.sender, error = %e, "Error in adding admin");
        }
    }

    fn try_backup(&self, message: &Message) -> Result<Vec<PathBuf>> {
        if !self.api.is_admin(&message.sender) || !message.has_attachments() {
            debug!(sender = %message.sender, "Ignoring backup request");
            return Ok(Vec::new());
        }

        let settings = self.store.snapshot();
        let admin_folder = settings.admin_folder(&message.sender).ok_or_else(|| {
            DaemonError::Config(format!("no folder registered for {}", message.sender))
        })?;

        let mut folder = settings.folder_from.join(safe_subfolder(admin_folder)?);
        if let Some(extra) = message.argument() {
            folder.push(safe_subfolder(extra)?);
        }

        debug!(
            user = %self.api.get_username(&message.sender),
            folder = %folder.display(),
            files = message.attachments.len(),
            "Incoming files"
        );
        fs::create_dir_all(&folder)?;

        let mut saved = Vec::with_capacity(message.attachments.len());
        for attachment in &message.attachments {
            let path = match attachment.save(&folder) {
                Ok(path) => path,
                Err(e) => {
                    error!(file = attachment.file_name(), error = %e, "Failed to save attachment");
                    continue;
                }
            };

            if let Err(e) = apply_ownership(
                &path,
                settings.user_to_own.as_deref(),
                settings.group_to_own.as_deref(),
            ) {
                warn!(path = %path.display(), error = %e, "Could not change file owner");
            }

            info!(path = %path.display(), "File saved");
            saved.push(path);
        }

        Ok(saved)
    }

    fn try_add_admin(&self, message: &Message) -> Result<Option<String>> {
        if !self.api.is_admin(&message.sender) {
            warn!(sender = %message.sender, "AddAdmin from non-admin ignored");
            return Ok(None);
        }

        let name = message
            .argument()
            .ok_or_else(|| DaemonError::InvalidFolder("folder name is required".into()))?;
        let relative = safe_subfolder(name)?;
        let folder = relative.to_string_lossy().into_owned();

        let folder_from = self.store.snapshot().folder_from;
        fs::create_dir_all(folder_from.join(&relative))?;

        self.store.update(|s| {
            s.folders_for_admins
                .insert(message.sender.clone(), folder.clone())
        })?;

        info!(
            user = %self.api.get_username(&message.sender),
            folder = %folder,
            "Admin folder registered"
        );
        Ok(Some(folder))
    }
}

/// Validate a folder name received in a message.
///
/// Only plain relative paths are accepted: no root, no drive prefix, no `..`.
pub fn safe_subfolder(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(DaemonError::InvalidFolder(name.to_string())),
        }
    }

    if out.as_os_str().is_empty() {
        return Err(DaemonError::InvalidFolder(name.to_string()));
    }
    Ok(out)
}

/// chown a received file to the configured user and/or group
#[cfg(unix)]
pub fn apply_ownership(path: &Path, user: Option<&str>, group: Option<&str>) -> Result<()> {
    use nix::unistd::{chown, Group, User};

    if user.is_none() && group.is_none() {
        return Ok(());
    }

    let uid = match user {
        Some(name) => Some(
            User::from_name(name)
                .map_err(|e| DaemonError::Ownership(format!("user {}: {}", name, e)))?
                .ok_or_else(|| DaemonError::Ownership(format!("unknown user {}", name)))?
                .uid,
        ),
        None => None,
    };

    let gid = match group {
        Some(name) => Some(
            Group::from_name(name)
                .map_err(|e| DaemonError::Ownership(format!("group {}: {}", name, e)))?
                .ok_or_else(|| DaemonError::Ownership(format!("unknown group {}", name)))?
                .gid,
        ),
        None => None,
    };

    chown(path, uid, gid)
        .map_err(|e| DaemonError::Ownership(format!("{}: {}", path.display(), e)))
}

#[cfg(not(unix))]
pub fn apply_ownership(_path: &Path, _user: Option<&str>, _group: Option<&str>) -> Result<()> {
    Ok(())
}
