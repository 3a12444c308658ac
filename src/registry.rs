// ============================================================================
// TEMPLATE REGISTRY: name-keyed, owner-checked, persisted
// ============================================================================
//
// All check-then-act sequences (name conflict + insert, owner check + mutate)
// run under one write lock.  Image loading and combo construction never do:
// a new URL is resolved before the lock is taken, and the combo is rebuilt
// afterwards and installed only if no newer mutation happened meanwhile.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::{CanvasSnapshot, PixelGrid};
use crate::error::{Result, TrackerError};
use crate::template::combo::{COMBO_NAME, build_combo};
use crate::template::source::TemplateLoader;
use crate::template::{Template, Visibility};
use crate::{log_info, log_warn};

const REGISTRY_MAGIC: &str = "PXR1";
const MAX_NAME_LEN: usize = 40;

/// How registered names are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatching {
    Exact,
    CaseInsensitive,
}

impl NameMatching {
    /// Lookup key of `name`.
    pub fn key(self, name: &str) -> String {
        match self {
            NameMatching::Exact => name.trim().to_string(),
            NameMatching::CaseInsensitive => name.trim().to_lowercase(),
        }
    }

    /// Spelling in the settings file.
    pub fn config_value(self) -> &'static str {
        match self {
            NameMatching::Exact => "exact",
            NameMatching::CaseInsensitive => "case_insensitive",
        }
    }
}

impl FromStr for NameMatching {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(NameMatching::Exact),
            "case_insensitive" => Ok(NameMatching::CaseInsensitive),
            other => Err(TrackerError::InvalidFormat(format!("unknown name matching `{}`", other))),
        }
    }
}

/// Registered names: 1 to 40 characters, no whitespace or control
/// characters, no leading `@` (reserved for virtual templates).
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TrackerError::InvalidName("the name cannot be empty".into()));
    }
    if name.starts_with('@') {
        return Err(TrackerError::InvalidName("names starting with '@' are reserved".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(TrackerError::InvalidName(format!(
            "the name is longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(TrackerError::InvalidName("the name cannot contain spaces".into()));
    }
    Ok(())
}

/// Result of [`TemplateRegistry::save`].
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    Added(Template),
    /// The same image was already tracked; nothing changed.
    AlreadyTracked(Template),
}

impl SaveOutcome {
    pub fn template(&self) -> &Template {
        match self {
            SaveOutcome::Added(t) | SaveOutcome::AlreadyTracked(t) => t,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RegistryFile {
    magic: String,
    entries: Vec<StoredTemplate>,
}

#[derive(Serialize, Deserialize)]
struct StoredTemplate {
    id: Uuid,
    name: String,
    owner_id: Option<u64>,
    url: String,
    title: Option<String>,
    ox: i32,
    oy: i32,
    width: u32,
    height: u32,
    scale: u32,
    visibility: Visibility,
    image_ref: String,
    pixels: Vec<u8>,
}

impl StoredTemplate {
    fn from_template(t: &Template) -> Self {
        Self {
            id: t.id,
            name: t.name.clone().unwrap_or_default(),
            owner_id: t.owner_id,
            url: t.url.clone(),
            title: t.title.clone(),
            ox: t.ox,
            oy: t.oy,
            width: t.width,
            height: t.height,
            scale: t.scale,
            visibility: t.visibility,
            image_ref: t.image_ref.clone(),
            pixels: t.pixels().to_vec(),
        }
    }

    fn into_template(self, canvas: &CanvasSnapshot) -> Result<Template> {
        let mut t = Template::from_indexed(self.pixels, self.width, self.height, self.ox, self.oy, canvas)?;
        t.id = self.id;
        t.name = Some(self.name);
        t.owner_id = self.owner_id;
        t.url = self.url;
        t.title = self.title;
        t.scale = self.scale;
        t.visibility = self.visibility;
        t.image_ref = self.image_ref;
        Ok(t)
    }
}

struct RegistryState {
    entries: BTreeMap<String, Template>,
    combo: Template,
    /// Bumped by every mutation.
    generation: u64,
}

pub struct TemplateRegistry {
    state: RwLock<RegistryState>,
    /// Last generation written to disk.
    persisted: Mutex<u64>,
    path: Option<PathBuf>,
    matching: NameMatching,
    grid: Arc<dyn PixelGrid>,
    loader: TemplateLoader,
}

impl TemplateRegistry {
    /// An empty registry that is never written to disk.
    pub fn in_memory(grid: Arc<dyn PixelGrid>, loader: TemplateLoader, matching: NameMatching) -> Result<Self> {
        Self::with_entries(BTreeMap::new(), None, grid, loader, matching)
    }

    /// Load the registry at `path`, or start empty if it does not exist.
    pub fn open(
        path: &Path,
        grid: Arc<dyn PixelGrid>,
        loader: TemplateLoader,
        matching: NameMatching,
    ) -> Result<Self> {
        let mut entries = BTreeMap::new();
        match std::fs::read(path) {
            Ok(raw) => {
                if raw.len() < 12 || &raw[8..12] != REGISTRY_MAGIC.as_bytes() {
                    return Err(TrackerError::InvalidFormat(format!(
                        "{} is not a template registry",
                        path.display()
                    )));
                }
                let file: RegistryFile = bincode::deserialize(&raw)?;
                let canvas = grid.snapshot();
                for stored in file.entries {
                    let t = stored.into_template(&canvas)?;
                    let key = matching.key(t.name.as_deref().unwrap_or_default());
                    if entries.insert(key, t).is_some() {
                        log_warn!("registry {}: duplicate name dropped", path.display());
                    }
                }
                log_info!("registry {}: {} templates loaded", path.display(), entries.len());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Self::with_entries(entries, Some(path.to_path_buf()), grid, loader, matching)
    }

    fn with_entries(
        entries: BTreeMap<String, Template>,
        path: Option<PathBuf>,
        grid: Arc<dyn PixelGrid>,
        loader: TemplateLoader,
        matching: NameMatching,
    ) -> Result<Self> {
        let public: Vec<Template> = entries.values().filter(|t| t.is_public()).cloned().collect();
        let combo = build_combo(&public, &grid.snapshot())?;
        Ok(Self {
            state: RwLock::new(RegistryState {
                entries,
                combo,
                generation: 0,
            }),
            persisted: Mutex::new(0),
            path,
            matching,
            grid,
            loader,
        })
    }

    pub fn grid(&self) -> &Arc<dyn PixelGrid> {
        &self.grid
    }

    pub fn matching(&self) -> NameMatching {
        self.matching
    }

    /// Build an unregistered template from `url` against the current canvas.
    pub fn load_template(&self, url: &str) -> Result<Template> {
        self.loader.load(url, &self.grid.snapshot())
    }

    fn is_combo_name(&self, name: &str) -> bool {
        self.matching.key(name) == self.matching.key(COMBO_NAME)
    }

    /// Registered template called `name`, or the combo for `@combo`.
    pub fn get_template(&self, name: &str, public_only: bool) -> Option<Template> {
        let state = self.state.read();
        if self.is_combo_name(name) {
            return Some(state.combo.clone());
        }
        state
            .entries
            .get(&self.matching.key(name))
            .filter(|t| !public_only || t.is_public())
            .cloned()
    }

    /// Public templates in name order.
    pub fn get_all_public_templates(&self) -> Vec<Template> {
        self.state
            .read()
            .entries
            .values()
            .filter(|t| t.is_public())
            .cloned()
            .collect()
    }

    /// Every registered template, private ones included, in name order.
    pub fn get_all_templates(&self) -> Vec<Template> {
        self.state.read().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The registered template with the same pixels and origin as `candidate`.
    pub fn check_duplicate_template(&self, candidate: &Template) -> Option<Template> {
        self.state
            .read()
            .entries
            .values()
            .find(|t| t.same_content(candidate))
            .cloned()
    }

    pub fn combo(&self) -> Template {
        self.state.read().combo.clone()
    }

    /// Register `template` as `name`, owned by `owner_id`.
    pub fn save(&self, mut template: Template, name: &str, owner_id: u64) -> Result<SaveOutcome> {
        let name = name.trim();
        validate_name(name)?;
        if template.total_placeable() == 0 {
            return Err(TrackerError::OutsideCanvas);
        }
        let key = self.matching.key(name);

        let generation = {
            let mut state = self.state.write();
            if let Some(existing) = state.entries.get(&key) {
                return Err(TrackerError::NameConflict(
                    existing.name.clone().unwrap_or_else(|| name.to_string()),
                ));
            }
            if let Some(dup) = state.entries.values().find(|t| t.same_content(&template)) {
                return Ok(SaveOutcome::AlreadyTracked(dup.clone()));
            }
            template.name = Some(name.to_string());
            template.owner_id = Some(owner_id);
            state.entries.insert(key, template.clone());
            state.generation += 1;
            state.generation
        };

        log_info!("registry: '{}' added by {}", name, owner_id);
        self.after_mutation(generation);
        Ok(SaveOutcome::Added(template))
    }

    /// Change the URL, name and/or owner of `name`.  Returns the entry before
    /// and after the change.
    pub fn update_template(
        &self,
        name: &str,
        requester_id: u64,
        new_url: Option<&str>,
        new_name: Option<&str>,
        new_owner_id: Option<u64>,
    ) -> Result<(Template, Template)> {
        let new_name = new_name.map(str::trim);
        if let Some(n) = new_name {
            validate_name(n)?;
        }
        let key = self.matching.key(name);

        // Early out before any image work; re-checked under the lock.
        {
            let state = self.state.read();
            let current = state
                .entries
                .get(&key)
                .ok_or_else(|| TrackerError::NotFound(name.to_string()))?;
            check_owner(current, requester_id)?;
        }

        let loaded = match new_url {
            Some(url) => {
                let t = self.load_template(url)?;
                if t.total_placeable() == 0 {
                    return Err(TrackerError::OutsideCanvas);
                }
                Some(t)
            }
            None => None,
        };

        let (old, new, generation) = {
            let mut state = self.state.write();
            let old = state
                .entries
                .get(&key)
                .cloned()
                .ok_or_else(|| TrackerError::NotFound(name.to_string()))?;
            check_owner(&old, requester_id)?;

            let new_key = new_name.map_or_else(|| key.clone(), |n| self.matching.key(n));
            if new_key != key
                && let Some(taken) = state.entries.get(&new_key)
            {
                return Err(TrackerError::NameConflict(taken.name.clone().unwrap_or_default()));
            }

            let mut new = match loaded {
                Some(mut t) => {
                    t.id = old.id;
                    t.visibility = old.visibility;
                    t
                }
                None => old.clone(),
            };
            new.name = new_name.map(str::to_string).or_else(|| old.name.clone());
            new.owner_id = new_owner_id.or(old.owner_id);

            state.entries.remove(&key);
            state.entries.insert(new_key, new.clone());
            state.generation += 1;
            (old, new, state.generation)
        };

        log_info!(
            "registry: '{}' updated by {} (name: {:?}, owner: {:?}, url changed: {})",
            name,
            requester_id,
            new.name,
            new.owner_id,
            new_url.is_some()
        );
        self.after_mutation(generation);
        Ok((old, new))
    }

    /// Remove `name`.  Only the owner may delete unless `force` is set.
    pub fn delete_template(&self, name: &str, requester_id: u64, force: bool) -> Result<Template> {
        let key = self.matching.key(name);
        let (removed, generation) = {
            let mut state = self.state.write();
            let current = state
                .entries
                .get(&key)
                .ok_or_else(|| TrackerError::NotFound(name.to_string()))?;
            if !force {
                check_owner(current, requester_id)?;
            }
            let removed = state
                .entries
                .remove(&key)
                .ok_or_else(|| TrackerError::NotFound(name.to_string()))?;
            state.generation += 1;
            (removed, state.generation)
        };

        log_info!(
            "registry: '{}' deleted by {}{}",
            name,
            requester_id,
            if force { " (forced)" } else { "" }
        );
        self.after_mutation(generation);
        Ok(removed)
    }

    fn after_mutation(&self, generation: u64) {
        self.rebuild_combo(generation);
        if let Err(e) = self.persist() {
            crate::log_err!("registry: failed to save: {}", e);
        }
    }

    /// Rebuild the combo from the members of `generation`.  Dropped if a
    /// newer mutation happened meanwhile; that mutation rebuilds it.
    fn rebuild_combo(&self, generation: u64) {
        let members: Vec<Template> = {
            let state = self.state.read();
            if state.generation != generation {
                return;
            }
            state.entries.values().filter(|t| t.is_public()).cloned().collect()
        };
        match build_combo(&members, &self.grid.snapshot()) {
            Ok(combo) => {
                let mut state = self.state.write();
                if state.generation == generation {
                    state.combo = combo;
                }
            }
            Err(e) => log_warn!("registry: combo rebuild failed: {}", e),
        }
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut persisted = self.persisted.lock();
        let (file, current) = {
            let state = self.state.read();
            let entries = state.entries.values().map(StoredTemplate::from_template).collect();
            (
                RegistryFile {
                    magic: REGISTRY_MAGIC.to_string(),
                    entries,
                },
                state.generation,
            )
        };
        if current <= *persisted {
            return Ok(());
        }
        write_registry(&file, path)?;
        *persisted = current;
        Ok(())
    }
}

fn check_owner(template: &Template, requester_id: u64) -> Result<()> {
    if template.owner_id == Some(requester_id) {
        Ok(())
    } else {
        Err(TrackerError::NotOwner {
            name: template.name.clone().unwrap_or_default(),
        })
    }
}

/// Write to a sibling temp file, then rename over `path`.
fn write_registry(file: &RegistryFile, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("bin.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        bincode::serialize_into(&mut writer, file)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Palette, SharedGrid};
    use crate::template::source::LocalImageSource;

    fn registry(matching: NameMatching) -> TemplateRegistry {
        let palette = Arc::new(Palette::new(vec![[255, 255, 255], [0, 0, 0]]));
        let canvas = CanvasSnapshot::new(8, 8, vec![0; 64], palette).unwrap();
        let grid: Arc<dyn PixelGrid> = Arc::new(SharedGrid::new(canvas));
        let loader = TemplateLoader::new(Arc::new(LocalImageSource::new()), 128, 4096);
        TemplateRegistry::in_memory(grid, loader, matching).unwrap()
    }

    fn square(reg: &TemplateRegistry, x: i32, y: i32, size: u32) -> Template {
        let canvas = reg.grid().snapshot();
        Template::from_indexed(vec![1; (size * size) as usize], size, size, x, y, &canvas).unwrap()
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("logo").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("@combo").is_err());
        assert!(validate_name("two words").is_err());
        assert!(validate_name(&"x".repeat(41)).is_err());
    }

    #[test]
    fn case_insensitive_lookup() {
        let reg = registry(NameMatching::CaseInsensitive);
        let t = square(&reg, 0, 0, 2);
        reg.save(t, "Logo", 1).unwrap();
        assert!(reg.get_template("logo", true).is_some());
        assert!(matches!(
            reg.save(square(&reg, 4, 4, 2), "LOGO", 2),
            Err(TrackerError::NameConflict(_))
        ));
    }

    #[test]
    fn exact_lookup() {
        let reg = registry(NameMatching::Exact);
        reg.save(square(&reg, 0, 0, 2), "Logo", 1).unwrap();
        assert!(reg.get_template("logo", false).is_none());
        assert!(reg.save(square(&reg, 4, 4, 2), "logo", 1).is_ok());
    }

    #[test]
    fn duplicates_reuse_the_existing_entry() {
        let reg = registry(NameMatching::CaseInsensitive);
        reg.save(square(&reg, 1, 1, 3), "first", 1).unwrap();
        let outcome = reg.save(square(&reg, 1, 1, 3), "second", 2).unwrap();
        match outcome {
            SaveOutcome::AlreadyTracked(t) => assert_eq!(t.name.as_deref(), Some("first")),
            SaveOutcome::Added(_) => panic!("duplicate was added"),
        }
        assert_eq!(reg.len(), 1);
        // moved by one pixel: not a duplicate
        assert!(reg.check_duplicate_template(&square(&reg, 2, 1, 3)).is_none());
    }

    #[test]
    fn rename_keeps_the_store_key() {
        let reg = registry(NameMatching::CaseInsensitive);
        let id = reg.save(square(&reg, 0, 0, 2), "old", 7).unwrap().template().id;
        let (old, new) = reg.update_template("old", 7, None, Some("new"), None).unwrap();
        assert_eq!(old.name.as_deref(), Some("old"));
        assert_eq!(new.name.as_deref(), Some("new"));
        assert_eq!(new.id, id);
        assert!(reg.get_template("old", false).is_none());
        assert_eq!(reg.get_template("new", false).unwrap().id, id);
    }

    #[test]
    fn only_the_owner_may_mutate() {
        let reg = registry(NameMatching::CaseInsensitive);
        reg.save(square(&reg, 0, 0, 2), "mine", 1).unwrap();
        assert!(matches!(
            reg.update_template("mine", 2, None, None, Some(2)),
            Err(TrackerError::NotOwner { .. })
        ));
        assert!(matches!(
            reg.delete_template("mine", 2, false),
            Err(TrackerError::NotOwner { .. })
        ));
        assert_eq!(reg.get_template("mine", false).unwrap().owner_id, Some(1));
        assert!(reg.delete_template("mine", 2, true).is_ok());
        assert!(reg.is_empty());
    }

    #[test]
    fn combo_follows_membership() {
        let reg = registry(NameMatching::CaseInsensitive);
        assert_eq!(reg.combo().total_placeable(), 0);
        reg.save(square(&reg, 0, 0, 2), "a", 1).unwrap();
        reg.save(square(&reg, 1, 1, 2), "b", 1).unwrap();
        assert_eq!(reg.combo().total_placeable(), 4 + 4 - 1);
        assert_eq!(reg.get_template("@COMBO", true).unwrap().total_placeable(), 7);
        reg.delete_template("a", 1, false).unwrap();
        assert_eq!(reg.combo().total_placeable(), 4);
    }

    #[test]
    fn outside_canvas_is_rejected() {
        let reg = registry(NameMatching::CaseInsensitive);
        assert!(matches!(
            reg.save(square(&reg, 20, 20, 2), "far", 1),
            Err(TrackerError::OutsideCanvas)
        ));
        assert!(reg.is_empty());
    }
}
