//! LabBook Core (C4): identity, on-disk layout, lifecycle, branch model,
//! favorites, and file operations with untracked ("large file") sections.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use labbook_git::{LogEntry, Repository};
use labbook_types::{ErrorKind, validate_name};
use serde::{Deserialize, Serialize};

use crate::config::LabBookConfig;

pub const WORKSPACE_BRANCH: &str = "gm.workspace";

/// The shared integration branch every LabBook carries.
pub fn integration_branch() -> String {
    WORKSPACE_BRANCH.to_string()
}

/// One user's working branch off the integration branch.
pub fn user_branch(username: &str) -> String {
    format!("{WORKSPACE_BRANCH}-{username}")
}

/// A section of the LabBook tree a file operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Code,
    Input,
    Output,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Code => "code",
            Section::Input => "input",
            Section::Output => "output",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ErrorKind> {
        match raw {
            "code" => Ok(Section::Code),
            "input" => Ok(Section::Input),
            "output" => Ok(Section::Output),
            other => Err(ErrorKind::validation(format!(
                "'{other}' is not a valid section; expected code, input, or output"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LabBookInfo {
    id: String,
    name: String,
    description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OwnerInfo {
    username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LabBookMetadata {
    labbook: LabBookInfo,
    owner: OwnerInfo,
}

/// A file or directory entry returned by `insert_file`/`walkdir`/`listdir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub key: String,
    pub is_dir: bool,
    pub is_favorite: bool,
}

/// One entry in a section's favorites list (spec.md §3 Favorite).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    pub section: String,
    pub key: String,
    pub description: String,
    pub is_dir: bool,
    pub index: usize,
}

/// A version-controlled project container: identity, layout, lifecycle,
/// branch model, favorites, and file operations.
pub struct LabBook {
    root: PathBuf,
    repo: Repository,
    config: LabBookConfig,
    username: String,
    owner: String,
    name: String,
}

impl LabBook {
    fn gigantum_dir(root: &Path) -> PathBuf {
        root.join(".gigantum")
    }

    fn metadata_path(root: &Path) -> PathBuf {
        Self::gigantum_dir(root).join("labbook.yaml")
    }

    /// `<base>/<username>/<owner>/labbooks/<name>` - the canonical on-disk
    /// location, matching `labbook.py`'s `working_dir/<username>/<owner>/
    /// labbooks/<name>` layout.
    pub fn canonical_path(base: &Path, username: &str, owner: &str, name: &str) -> PathBuf {
        base.join(username).join(owner).join("labbooks").join(name)
    }

    /// Create a brand-new LabBook: directory skeleton, `labbook.yaml`,
    /// `.gitignore`, an initialized repository with the skeleton committed,
    /// and the two-branch model (`gm.workspace` / `gm.workspace-<username>`,
    /// the latter checked out last).
    pub fn new(
        base: &Path,
        owner: &str,
        name: &str,
        username: &str,
        description: Option<&str>,
    ) -> Result<Self> {
        validate_name(name).map_err(anyhow::Error::new)?;

        let root = Self::canonical_path(base, username, owner, name);
        if root.exists() {
            bail!(ErrorKind::conflict(format!(
                "{} already exists",
                root.display()
            )));
        }

        for section in [Section::Code, Section::Input, Section::Output] {
            fs::create_dir_all(root.join(section.as_str()))?;
        }
        let gigantum = Self::gigantum_dir(&root);
        fs::create_dir_all(gigantum.join("env"))?;
        fs::create_dir_all(gigantum.join("activity").join("log"))?;
        fs::create_dir_all(gigantum.join("activity").join("index"))?;
        fs::create_dir_all(gigantum.join("favorites"))?;

        fs::write(root.join(".gitignore"), ".DS_Store\n")?;

        let metadata = LabBookMetadata {
            labbook: LabBookInfo {
                id: generate_id(),
                name: name.to_string(),
                description: description.unwrap_or_default().to_string(),
            },
            owner: OwnerInfo {
                username: owner.to_string(),
            },
        };
        fs::write(
            Self::metadata_path(&root),
            serde_yaml::to_string(&metadata).context("serializing labbook.yaml")?,
        )?;

        let repo = Repository::at(&root);
        repo.initialize()?;
        repo.add_all()?;
        repo.commit(&format!("Creating new empty LabBook: {name}"), None, None)?;

        repo.create_branch(WORKSPACE_BRANCH)?;
        repo.create_and_checkout_branch(&user_branch(username))?;

        Ok(Self {
            root,
            repo,
            config: LabBookConfig::load_from_base(base)?,
            username: username.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Load an existing LabBook by its on-disk directory. `root` is
    /// expected at `<base>/<username>/<owner>/labbooks/<name>`; `username`
    /// and `base` are recovered from that path, since `labbook.yaml` itself
    /// only records `owner`/`name`.
    pub fn from_directory(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let raw = fs::read_to_string(Self::metadata_path(&root))
            .with_context(|| format!("reading labbook.yaml under {}", root.display()))?;
        let metadata: LabBookMetadata =
            serde_yaml::from_str(&raw).context("parsing labbook.yaml")?;

        // root = base/username/owner/labbooks/name
        let labbooks_dir = root.parent();
        let owner_dir = labbooks_dir.and_then(Path::parent);
        let username_dir = owner_dir.and_then(Path::parent);
        let base = username_dir
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.clone());
        let username = username_dir
            .and_then(Path::file_name)
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| metadata.owner.username.clone());

        Ok(Self {
            repo: Repository::at(&root),
            config: LabBookConfig::load_from_base(&base).unwrap_or_default(),
            username,
            owner: metadata.owner.username,
            name: metadata.labbook.name,
            root,
        })
    }

    pub fn from_name(base: &Path, username: &str, owner: &str, name: &str) -> Result<Self> {
        Self::from_directory(Self::canonical_path(base, username, owner, name))
    }

    /// Parse a `"username|owner|name"` key and load that LabBook.
    pub fn from_key(base: &Path, key: &str) -> Result<Self> {
        let mut parts = key.splitn(3, '|');
        let (username, owner, name) = (
            parts.next().context("labbook key missing username")?,
            parts.next().context("labbook key missing owner")?,
            parts.next().context("labbook key missing name")?,
        );
        Self::from_name(base, username, owner, name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn config(&self) -> &LabBookConfig {
        &self.config
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the LabBook's directory. Fails if the destination exists.
    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        validate_name(new_name).map_err(anyhow::Error::new)?;
        let new_root = self.root.with_file_name(new_name);
        if new_root.exists() {
            bail!(ErrorKind::conflict(format!(
                "{} already exists",
                new_root.display()
            )));
        }
        fs::rename(&self.root, &new_root)
            .with_context(|| format!("renaming {} to {}", self.root.display(), new_root.display()))?;
        self.root = new_root;
        self.repo = Repository::at(&self.root);
        self.name = new_name.to_string();
        Ok(())
    }

    /// Auto-commit any uncommitted working-tree changes. Called defensively
    /// before any branch-changing operation so checkout is non-destructive.
    pub fn sweep_uncommitted_changes(&self) -> Result<()> {
        if !self.repo.is_clean()? {
            self.repo.add_all()?;
            self.repo.commit("Auto-commit on branch change", None, None)?;
        }
        Ok(())
    }

    /// Switch branches, sweeping uncommitted changes first so checkout of
    /// an existing branch is never destructive. `new=true` creates the
    /// branch; it must not already exist.
    pub fn checkout_branch(&self, name: &str, new: bool) -> Result<()> {
        if new {
            let exists = self.repo.list_branches()?.local.iter().any(|b| b == name);
            if exists {
                bail!(ErrorKind::conflict(format!("branch {name} already exists")));
            }
            self.sweep_uncommitted_changes()?;
            self.repo.create_and_checkout_branch(name)?;
        } else {
            self.sweep_uncommitted_changes()?;
            self.repo.checkout(name)?;
        }
        Ok(())
    }

    /// Read (and lazily create) this working copy's checkout context
    /// identifier, persisted at `.gigantum/.checkout`.
    ///
    /// The on-disk value follows the documented
    /// `<user>-<owner>-<name>-<branch>-<rand10>` form for human
    /// readability and debugging. The Detail Store's on-disk basename,
    /// however, is keyed off a fixed-width 9-character digest of this
    /// string rather than the string itself: the original implementation
    /// assumed (via a commented-out, never-enforced assert) that this
    /// identifier was always short enough to make a 20-byte basename, but
    /// names and branches have no length bound, so `get()` would silently
    /// read from the wrong log file once the identifier grew past 9
    /// characters. Hashing down to a fixed width preserves the round-trip
    /// the detail key format requires.
    pub fn checkout_id(&self) -> Result<String> {
        let checkout_path = Self::gigantum_dir(&self.root).join(".checkout");
        if let Ok(existing) = fs::read_to_string(&checkout_path) {
            return Ok(existing.trim().to_string());
        }

        let branch = self.repo.current_branch_name().unwrap_or_else(|_| WORKSPACE_BRANCH.to_string());
        let rand10 = random_alphanumeric(10);
        let checkout_id = format!("{}-{}-{}-{branch}-{rand10}", self.username, self.owner, self.name);

        fs::write(&checkout_path, &checkout_id)
            .with_context(|| format!("writing {}", checkout_path.display()))?;
        Ok(checkout_id)
    }

    /// Fixed-width id the Detail Store actually keys its log family on; see
    /// [`Self::checkout_id`] for why this differs from the raw context.
    pub fn detail_store_id(&self) -> Result<String> {
        Ok(digest9(&self.checkout_id()?))
    }

    /// Create `rel` (relative to the LabBook root) and a `.gitkeep` in every
    /// level created, so empty directories survive checkout.
    pub fn makedir(&self, rel: &str, commit: bool) -> Result<()> {
        let target = self.root.join(rel);
        let mut to_create = Vec::new();
        let mut cursor = target.as_path();
        while !cursor.exists() {
            to_create.push(cursor.to_path_buf());
            match cursor.parent() {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        for dir in to_create.iter().rev() {
            fs::create_dir_all(dir)?;
            fs::write(dir.join(".gitkeep"), "")?;
        }

        if commit {
            self.repo.add_all()?;
            self.repo.commit(&format!("Created new directory: {rel}"), None, None)?;
        }
        Ok(())
    }

    fn validate_dest_in_section(&self, section: Section, dest: &str) -> Result<PathBuf> {
        use std::path::Component;

        let rel = Path::new(dest);
        if rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            bail!(ErrorKind::validation(format!(
                "'{dest}' escapes section '{}'",
                section.as_str()
            )));
        }
        Ok(self.root.join(section.as_str()).join(rel))
    }

    /// Copy `src` into `section/dest`, stage, and commit.
    pub fn insert_file(&self, section: Section, src: &Path, dest: &str) -> Result<FileEntry> {
        let dest_path = self.validate_dest_in_section(section, dest)?;
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, &dest_path)
            .with_context(|| format!("copying {} to {}", src.display(), dest_path.display()))?;

        self.repo.add_all()?;
        self.repo
            .commit(&format!("Added file {dest} to {}", section.as_str()), None, None)?;

        Ok(FileEntry {
            key: dest.to_string(),
            is_dir: false,
            is_favorite: self.is_favorite(section, dest)?,
        })
    }

    /// Delete `section/rel`. Refuses to delete a non-empty directory
    /// without `directory=true`.
    pub fn delete_file(&self, section: Section, rel: &str, directory: bool) -> Result<()> {
        let path = self.validate_dest_in_section(section, rel)?;
        if path.is_dir() {
            if !directory {
                bail!(ErrorKind::validation(format!(
                    "'{rel}' is a directory; pass directory=true to delete it"
                )));
            }
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }

        self.repo.add_all()?;
        self.repo
            .commit(&format!("Removed {} from {}", rel, section.as_str()), None, None)?;
        Ok(())
    }

    /// Move `src` to `dest` within `section`.
    pub fn move_file(&self, section: Section, src: &str, dest: &str) -> Result<()> {
        let src_path = self.validate_dest_in_section(section, src)?;
        let dest_path = self.validate_dest_in_section(section, dest)?;
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&src_path, &dest_path)
            .with_context(|| format!("moving {} to {}", src_path.display(), dest_path.display()))?;

        self.repo.add_all()?;
        self.repo
            .commit(&format!("Moved {src} to {dest} in {}", section.as_str()), None, None)?;
        Ok(())
    }

    /// Sorted entries under `section`. Hidden by default excludes `.git`,
    /// `.gigantum`, and any path with a leading-dot component.
    pub fn walkdir(&self, section: Section, show_hidden: bool) -> Result<Vec<FileEntry>> {
        let section_root = self.root.join(section.as_str());
        let mut entries = Vec::new();
        self.walk_collect(&section_root, &section_root, show_hidden, section, &mut entries)?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn walk_collect(
        &self,
        base: &Path,
        dir: &Path,
        show_hidden: bool,
        section: Section,
        out: &mut Vec<FileEntry>,
    ) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if !show_hidden && (name == ".git" || name == ".gigantum" || name.starts_with('.')) {
                continue;
            }

            let rel = path.strip_prefix(base).unwrap().to_string_lossy().to_string();
            let is_dir = path.is_dir();
            out.push(FileEntry {
                key: rel.clone(),
                is_dir,
                is_favorite: self.is_favorite(section, &rel)?,
            });
            if is_dir {
                self.walk_collect(base, &path, show_hidden, section, out)?;
            }
        }
        Ok(())
    }

    /// Single-level listing under `section/base_path`.
    pub fn listdir(&self, section: Section, base_path: &str) -> Result<Vec<FileEntry>> {
        let target = self.validate_dest_in_section(section, base_path)?;
        if !target.exists() {
            bail!(ErrorKind::not_found(format!("{base_path} does not exist")));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&target)? {
            let entry = entry?;
            let rel = Path::new(base_path)
                .join(entry.file_name())
                .to_string_lossy()
                .to_string();
            entries.push(FileEntry {
                key: rel.clone(),
                is_dir: entry.path().is_dir(),
                is_favorite: self.is_favorite(section, &rel)?,
            });
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn favorites_path(&self, section: Section) -> PathBuf {
        Self::gigantum_dir(&self.root)
            .join("favorites")
            .join(format!("{}.json", section.as_str()))
    }

    fn read_favorites(&self, section: Section) -> Result<Vec<Favorite>> {
        let path = self.favorites_path(section);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_favorites(&self, section: Section, favorites: &[Favorite]) -> Result<()> {
        let path = self.favorites_path(section);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(favorites)?)?;
        Ok(())
    }

    fn is_favorite(&self, section: Section, key: &str) -> Result<bool> {
        Ok(self.read_favorites(section)?.iter().any(|f| f.key == key))
    }

    /// Mark `key` as a favorite, validating that it exists and matches the
    /// declared kind. Appends by default, or inserts at `position`
    /// (range-checked). Duplicates are refused.
    pub fn create_favorite(
        &self,
        section: Section,
        key: &str,
        description: &str,
        is_dir: bool,
        position: Option<usize>,
    ) -> Result<()> {
        let target = self.validate_dest_in_section(section, key)?;
        if !target.exists() {
            bail!(ErrorKind::not_found(format!("{key} does not exist")));
        }
        if target.is_dir() != is_dir {
            bail!(ErrorKind::validation(format!(
                "{key} kind mismatch: is_dir={} but {is_dir} was requested",
                target.is_dir()
            )));
        }

        let mut favorites = self.read_favorites(section)?;
        if favorites.iter().any(|f| f.key == key) {
            bail!(ErrorKind::conflict(format!("{key} is already a favorite")));
        }

        let index = position.unwrap_or(favorites.len());
        if index > favorites.len() {
            bail!(ErrorKind::validation(format!(
                "position {index} is out of range for {} favorites",
                favorites.len()
            )));
        }

        favorites.insert(
            index,
            Favorite {
                section: section.as_str().to_string(),
                key: key.to_string(),
                description: description.to_string(),
                is_dir,
                index,
            },
        );
        renumber(&mut favorites);
        self.write_favorites(section, &favorites)
    }

    /// Remove the favorite at `index`, renumbering to keep indices dense.
    pub fn remove_favorite(&self, section: Section, index: usize) -> Result<()> {
        let mut favorites = self.read_favorites(section)?;
        let pos = favorites
            .iter()
            .position(|f| f.index == index)
            .ok_or_else(|| ErrorKind::not_found(format!("no favorite at index {index}")))?;
        favorites.remove(pos);
        renumber(&mut favorites);
        self.write_favorites(section, &favorites)
    }

    /// Mark `section` untracked (large-file mode): appends `.gitignore`
    /// rules so git never looks inside it. Refuses if the section is
    /// non-empty (other than its `.gitkeep`) or already untracked.
    pub fn set_untracked(&self, section: Section) -> Result<()> {
        let gitignore_path = self.root.join(".gitignore");
        let existing = fs::read_to_string(&gitignore_path).unwrap_or_default();
        let marker = format!("{}/*", section.as_str());
        if existing.lines().any(|l| l == marker) {
            bail!(ErrorKind::conflict(format!(
                "{} is already untracked",
                section.as_str()
            )));
        }

        let section_root = self.root.join(section.as_str());
        let non_gitkeep_entries = fs::read_dir(&section_root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != ".gitkeep")
            .count();
        if non_gitkeep_entries > 0 {
            bail!(ErrorKind::conflict(format!(
                "{} is not empty; cannot switch to untracked mode",
                section.as_str()
            )));
        }

        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&marker);
        updated.push('\n');
        updated.push_str(&format!("!{}/.gitkeep\n", section.as_str()));
        fs::write(&gitignore_path, updated)?;

        self.repo.add_all()?;
        self.repo
            .commit(&format!("Set {} untracked", section.as_str()), None, None)?;
        Ok(())
    }

    /// Commit history, optionally scoped to one file.
    pub fn log(&self, filename: Option<&str>, max_count: Option<usize>) -> Result<Vec<LogEntry>> {
        self.repo.log(filename, max_count)
    }

    pub fn log_entry(&self, commit: &str) -> Result<LogEntry> {
        self.repo.log_entry(commit)
    }

    /// Enumerate `<base>/<user>/*/labbooks/*` (optionally scoped to one
    /// user), matching `labbook.py::list_local_labbooks`.
    pub fn list_local_labbooks(base: &Path, username: Option<&str>) -> Result<Vec<PathBuf>> {
        fn subdirs(dir: &Path) -> Vec<PathBuf> {
            fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.path())
                        .filter(|p| p.is_dir())
                        .collect()
                })
                .unwrap_or_default()
        }

        let mut found = Vec::new();
        let user_dirs: Vec<PathBuf> = match username {
            Some(user) => vec![base.join(user)],
            None => subdirs(base),
        };

        for user_dir in user_dirs {
            for owner_dir in subdirs(&user_dir) {
                let labbooks_dir = owner_dir.join("labbooks");
                if !labbooks_dir.is_dir() {
                    continue;
                }
                for entry in fs::read_dir(&labbooks_dir)?.filter_map(|e| e.ok()) {
                    if entry.path().is_dir() {
                        found.push(entry.path());
                    }
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Total on-disk byte size, walking the tree without following symlinks.
    pub fn content_size(&self) -> Result<u64> {
        content_size_of(&self.root)
    }
}

fn content_size_of(path: &Path) -> Result<u64> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_symlink() {
        return Ok(0);
    }
    if metadata.is_file() {
        return Ok(metadata.len());
    }
    let mut total = 0;
    if metadata.is_dir() {
        for entry in fs::read_dir(path)? {
            total += content_size_of(&entry?.path())?;
        }
    }
    Ok(total)
}

fn renumber(favorites: &mut [Favorite]) {
    for (i, favorite) in favorites.iter_mut().enumerate() {
        favorite.index = i;
    }
}

fn generate_id() -> String {
    random_alphanumeric(12)
}

fn random_alphanumeric(len: usize) -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARS[rng.r#gen::<usize>() % CHARS.len()] as char)
        .collect()
}

fn digest9(input: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:09x}", hasher.finish() % 68_719_476_736)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn new_creates_the_directory_skeleton_and_two_branches() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", Some("my first labbook")).unwrap();

        assert!(lb.root().join("code").is_dir());
        assert!(lb.root().join("input").is_dir());
        assert!(lb.root().join("output").is_dir());
        assert!(lb.root().join(".gigantum/labbook.yaml").exists());

        let branches = lb.repo().list_branches().unwrap();
        assert!(branches.local.iter().any(|b| b == WORKSPACE_BRANCH));
        assert!(branches.local.iter().any(|b| b == &user_branch("alice")));
        assert_eq!(lb.repo().current_branch_name().unwrap(), user_branch("alice"));
    }

    #[test]
    fn new_fails_if_directory_already_exists() {
        let base = tempdir().unwrap();
        LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        let err = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap_err();
        assert!(err.to_string().contains("conflict"));
    }

    #[test]
    fn new_rejects_an_invalid_name() {
        let base = tempdir().unwrap();
        let err = LabBook::new(base.path(), "alice", "-bad", "alice", None).unwrap_err();
        assert!(err.to_string().contains("validation"));
    }

    #[test]
    fn from_directory_round_trips_metadata() {
        let base = tempdir().unwrap();
        LabBook::new(base.path(), "teamorg", "lb1", "alice", Some("desc")).unwrap();
        let loaded = LabBook::from_name(base.path(), "alice", "teamorg", "lb1").unwrap();
        assert_eq!(loaded.name(), "lb1");
        assert_eq!(loaded.owner(), "teamorg");
        assert_eq!(loaded.username(), "alice");
    }

    #[test]
    fn canonical_path_includes_the_username_segment_distinct_from_owner() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "teamorg", "lb1", "alice", None).unwrap();
        assert_eq!(
            lb.root(),
            base.path().join("alice").join("teamorg").join("labbooks").join("lb1")
        );
    }

    #[test]
    fn makedir_creates_gitkeep_sentinels_in_every_level() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        lb.makedir("code/a/b/c", false).unwrap();
        assert!(lb.root().join("code/a/.gitkeep").exists());
        assert!(lb.root().join("code/a/b/.gitkeep").exists());
        assert!(lb.root().join("code/a/b/c/.gitkeep").exists());
    }

    #[test]
    fn insert_file_copies_stages_and_commits() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        let src = base.path().join("source.txt");
        fs::write(&src, "hello").unwrap();

        let entry = lb.insert_file(Section::Code, &src, "source.txt").unwrap();
        assert_eq!(entry.key, "source.txt");
        assert!(!entry.is_favorite);
        assert!(lb.root().join("code/source.txt").exists());
        assert!(lb.repo().is_clean().unwrap());
    }

    #[test]
    fn insert_file_rejects_destinations_outside_the_section() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        let src = base.path().join("source.txt");
        fs::write(&src, "hello").unwrap();

        let err = lb
            .insert_file(Section::Code, &src, "../output/escape.txt")
            .unwrap_err();
        assert!(err.to_string().contains("validation"));
    }

    #[test]
    fn favorites_stay_dense_after_create_and_remove() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        let src = base.path().join("a.txt");
        fs::write(&src, "hi").unwrap();
        lb.insert_file(Section::Code, &src, "a.txt").unwrap();
        fs::write(base.path().join("b.txt"), "hi").unwrap();
        lb.insert_file(Section::Code, &base.path().join("b.txt"), "b.txt")
            .unwrap();

        lb.create_favorite(Section::Code, "a.txt", "first", false, None)
            .unwrap();
        lb.create_favorite(Section::Code, "b.txt", "second", false, None)
            .unwrap();
        lb.remove_favorite(Section::Code, 0).unwrap();

        let favorites = lb.read_favorites(Section::Code).unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].index, 0);
        assert_eq!(favorites[0].key, "b.txt");
    }

    #[test]
    fn create_favorite_rejects_duplicate() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        let src = base.path().join("a.txt");
        fs::write(&src, "hi").unwrap();
        lb.insert_file(Section::Code, &src, "a.txt").unwrap();
        lb.create_favorite(Section::Code, "a.txt", "first", false, None)
            .unwrap();
        let err = lb
            .create_favorite(Section::Code, "a.txt", "again", false, None)
            .unwrap_err();
        assert!(err.to_string().contains("conflict"));
    }

    #[test]
    fn walkdir_hides_dotfiles_by_default() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        fs::write(lb.root().join("code/.hidden"), "x").unwrap();
        fs::write(lb.root().join("code/visible.txt"), "x").unwrap();

        let entries = lb.walkdir(Section::Code, false).unwrap();
        assert!(entries.iter().all(|e| !e.key.starts_with('.')));
        assert!(entries.iter().any(|e| e.key == "visible.txt"));

        let all_entries = lb.walkdir(Section::Code, true).unwrap();
        assert!(all_entries.len() >= entries.len());
    }

    #[test]
    fn set_untracked_patches_gitignore_and_refuses_a_second_call() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        lb.set_untracked(Section::Output).unwrap();

        let gitignore = fs::read_to_string(lb.root().join(".gitignore")).unwrap();
        assert!(gitignore.contains("output/*"));
        assert!(gitignore.contains("!output/.gitkeep"));

        let err = lb.set_untracked(Section::Output).unwrap_err();
        assert!(err.to_string().contains("conflict"));
    }

    #[test]
    fn set_untracked_refuses_a_nonempty_section() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        fs::write(lb.root().join("output/data.bin"), "x").unwrap();
        let err = lb.set_untracked(Section::Output).unwrap_err();
        assert!(err.to_string().contains("conflict"));
    }

    #[test]
    fn checkout_id_is_persisted_and_hashed_to_a_fixed_width_detail_store_id() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        let id1 = lb.checkout_id().unwrap();
        let id2 = lb.checkout_id().unwrap();
        assert_eq!(id1, id2);
        assert!(id1.starts_with("alice-alice-lb1-"));

        let detail_id = lb.detail_store_id().unwrap();
        assert_eq!(detail_id.len(), 9);
    }

    #[test]
    fn content_size_sums_file_bytes_recursively() {
        let base = tempdir().unwrap();
        let lb = LabBook::new(base.path(), "alice", "lb1", "alice", None).unwrap();
        fs::write(lb.root().join("code/a.txt"), "12345").unwrap();
        fs::create_dir_all(lb.root().join("code/sub")).unwrap();
        fs::write(lb.root().join("code/sub/b.txt"), "67890").unwrap();

        assert!(lb.content_size().unwrap() >= 10);
    }

    #[test]
    fn list_local_labbooks_finds_created_labbooks() {
        let base = tempdir().unwrap();
        LabBook::new(base.path(), "teamorg", "lb1", "alice", None).unwrap();
        LabBook::new(base.path(), "otherorg", "lb2", "alice", None).unwrap();
        LabBook::new(base.path(), "teamorg", "lb3", "bob", None).unwrap();

        let found = LabBook::list_local_labbooks(base.path(), Some("alice")).unwrap();
        assert_eq!(found.len(), 2);

        let all = LabBook::list_local_labbooks(base.path(), None).unwrap();
        assert_eq!(all.len(), 3);
    }
}
