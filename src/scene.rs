//! Scenes: the renditions of a region subtree, filtered, compiled and picked.
//!
//! A scene subscribes to the rendition changes of its region and records them as a change
//! status and a compile status. Observers of the scene are notified of changes once per
//! outermost [`Scene::begin_cache`]/[`Scene::end_cache`] bracket.
use crate::callback::{CallbackId, CallbackList, CallbackStatus};
use crate::picking::{InteractionVolume, PickError, PickSettings, PickedObjectList, SelectBuffer};
use crate::region::{RegionId, RegionTree};
use crate::render::{CommandBuffer, DisplayListHandle, RenderCommand, Renderer};
use crate::rendition::{ChangeStatus, CompileStatus, Graphic, RenditionEvent, RenditionEventKind};
use log::{debug, error, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::rc::{Rc, Weak};

mod filter;

pub use filter::*;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    pub pick: PickSettings,
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SceneError {
    UnknownRegion(RegionId),
    NoRegion,
    CacheNotOpen,
    FilterNotInScene(FilterId),
    /// Filter priorities are 1-based, with 0 meaning last.
    PriorityOutOfRange(usize),
    LightExists(String),
    NoSuchLight(String),
    NotCompiled,
    DisplayListAllocation(eyre::Report),
    Renderer(eyre::Report),
}

impl Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneError::UnknownRegion(_) => write!(f, "Region does not exist or has no rendition"),
            SceneError::NoRegion => write!(f, "Scene has no region"),
            SceneError::CacheNotOpen => write!(f, "end_cache without begin_cache"),
            SceneError::FilterNotInScene(id) => write!(f, "Filter {} is not in scene", id.0),
            SceneError::PriorityOutOfRange(p) => write!(f, "Filter priority {} out of range", p),
            SceneError::LightExists(name) => write!(f, "Light \"{}\" is already in scene", name),
            SceneError::NoSuchLight(name) => write!(f, "Light \"{}\" is not in scene", name),
            SceneError::NotCompiled => write!(f, "Scene has never been compiled"),
            SceneError::DisplayListAllocation(err) => write!(f, "Could not allocate display list: {}", err),
            SceneError::Renderer(err) => write!(f, "Renderer failed: {}", err),
        }
    }
}

impl Error for SceneError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LightKind {
    Ambient,
    Directional { direction: Vector3<f64> },
    Point { position: Vector3<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub colour: [f64; 3],
}

impl Light {
    pub fn new(name: &str, kind: LightKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            colour: [1.0, 1.0, 1.0],
        }
    }
}

/// Sent to scene observers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SceneEvent {
    pub change: ChangeStatus,
}

/// Change state shared between a scene and the rendition callback it registers.
#[derive(Debug)]
struct SceneCore {
    cache: Cell<u32>,
    change_status: Cell<ChangeStatus>,
    compile_status: Cell<CompileStatus>,
    /// Union of changes since the display lists were last built.
    pending_rebuild: Cell<ChangeStatus>,
    renditions_stale: Cell<bool>,
    observers: RefCell<CallbackList<SceneEvent>>,
}

impl SceneCore {
    fn new() -> Self {
        Self {
            cache: Cell::new(0),
            change_status: Cell::new(ChangeStatus::NoChange),
            compile_status: Cell::new(CompileStatus::NotCompiled),
            pending_rebuild: Cell::new(ChangeStatus::NoChange),
            renditions_stale: Cell::new(false),
            observers: RefCell::new(CallbackList::new()),
        }
    }

    fn record(&self, status: ChangeStatus, compile: CompileStatus) {
        self.change_status.set(self.change_status.get().merge(status));
        self.pending_rebuild.set(self.pending_rebuild.get().merge(status));
        self.compile_status.set(self.compile_status.get().degrade(compile));
    }

    /// Something drawn by the scene changed; only its own graphics need recompiling.
    fn notify_object_changed(&self, fast_changing: bool) {
        let status = if fast_changing {
            ChangeStatus::FastChange
        } else {
            ChangeStatus::Change
        };
        self.record(status, CompileStatus::ChildNotCompiled);
        self.refresh();
    }

    /// The scene itself changed, so everything must be recompiled.
    fn changed_private(&self, fast_changing: bool) {
        let status = if fast_changing {
            ChangeStatus::FastChange
        } else {
            ChangeStatus::Change
        };
        self.record(status, CompileStatus::NotCompiled);
        self.refresh();
    }

    fn rendition_changed(&self, event: &RenditionEvent) {
        match event.kind {
            RenditionEventKind::Changed(ChangeStatus::NoChange) => {}
            RenditionEventKind::Changed(ChangeStatus::FastChange) => self.notify_object_changed(true),
            RenditionEventKind::Changed(ChangeStatus::Change) => self.notify_object_changed(false),
            RenditionEventKind::ChildAdded(_) | RenditionEventKind::ChildRemoved(_) => {
                self.renditions_stale.set(true);
                self.changed_private(false);
            }
        }
    }

    /// Sends pending changes to observers unless a cache bracket is open. Changes made by
    /// observers while being notified are delivered by the same loop.
    fn refresh(&self) {
        if self.cache.get() > 0 {
            return;
        }
        loop {
            let status = self.change_status.replace(ChangeStatus::NoChange);
            if !status.is_changed() {
                break;
            }
            match self.observers.try_borrow_mut() {
                Ok(mut observers) => observers.notify(&SceneEvent { change: status }),
                Err(_) => {
                    // Already notifying further up the stack; that loop picks this up.
                    self.change_status.set(self.change_status.get().merge(status));
                    break;
                }
            }
        }
    }
}

pub struct Scene {
    name: String,
    core: Rc<SceneCore>,
    region: Option<RegionId>,
    region_callback: Option<CallbackId>,
    renditions: Vec<RegionId>,
    filters: Vec<SceneFilter>,
    next_filter_id: u64,
    lights: Vec<Light>,
    build: bool,
    display_list: Option<DisplayListHandle>,
    fast_changing_display_list: Option<DisplayListHandle>,
    settings: SceneSettings,
    select_buffer_size: usize,
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("region", &self.region)
            .field("renditions", &self.renditions)
            .field("filters", &self.filters.len())
            .field("lights", &self.lights.len())
            .field("core", &self.core)
            .finish()
    }
}

impl Scene {
    pub fn new(name: &str) -> Self {
        Self::with_settings(name, SceneSettings::default())
    }

    pub fn with_settings(name: &str, settings: SceneSettings) -> Self {
        Self {
            name: name.to_string(),
            core: Rc::new(SceneCore::new()),
            region: None,
            region_callback: None,
            renditions: Vec::new(),
            filters: Vec::new(),
            next_filter_id: 1,
            lights: Vec::new(),
            build: true,
            display_list: None,
            fast_changing_display_list: None,
            settings,
            select_buffer_size: settings.pick.initial_buffer_size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn settings(&self) -> &SceneSettings {
        &self.settings
    }

    pub fn region(&self) -> Option<RegionId> {
        self.region
    }

    pub fn change_status(&self) -> ChangeStatus {
        self.core.change_status.get()
    }

    pub fn compile_status(&self) -> CompileStatus {
        self.core.compile_status.get()
    }

    /// Current select buffer size, grown by earlier picks that overflowed.
    pub fn select_buffer_size(&self) -> usize {
        self.select_buffer_size
    }

    pub fn add_callback<F>(&mut self, callback: F) -> CallbackId
    where
        F: FnMut(&SceneEvent) -> CallbackStatus + 'static,
    {
        self.core.observers.borrow_mut().add(callback)
    }

    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        self.core.observers.borrow_mut().remove(id)
    }

    /// Binds the scene to `region` and its subtree, replacing any previous binding.
    pub fn set_region(&mut self, tree: &mut RegionTree, region: RegionId) -> Result<(), SceneError> {
        if self.region == Some(region) {
            return Ok(());
        }
        if tree.rendition(region).is_none() {
            error!("Scene \"{}\": cannot set region without rendition", self.name);
            return Err(SceneError::UnknownRegion(region));
        }
        self.detach_callback(tree);
        let core: Weak<SceneCore> = Rc::downgrade(&self.core);
        let callback = tree
            .add_rendition_callback(region, move |event| match core.upgrade() {
                Some(core) => {
                    core.rendition_changed(event);
                    CallbackStatus::Keep
                }
                None => CallbackStatus::Remove,
            })
            .map_err(|_| SceneError::UnknownRegion(region))?;
        self.region = Some(region);
        self.region_callback = Some(callback);
        self.rebuild_renditions(tree);
        self.core.changed_private(false);
        Ok(())
    }

    /// Unsubscribes from the region and forgets its renditions.
    pub fn detach(&mut self, tree: &mut RegionTree) {
        if self.region.is_some() {
            self.detach_callback(tree);
            self.region = None;
            self.renditions.clear();
            self.core.changed_private(false);
        }
    }

    fn detach_callback(&mut self, tree: &mut RegionTree) {
        if let (Some(region), Some(callback)) = (self.region, self.region_callback.take()) {
            tree.remove_rendition_callback(region, callback);
        }
    }

    fn rebuild_renditions(&mut self, tree: &RegionTree) {
        self.renditions = self
            .region
            .map(|region| tree.subtree(region))
            .unwrap_or_default();
        self.renditions.sort_by(|a, b| tree.compare_regions(*a, *b));
        self.core.renditions_stale.set(false);
    }

    /// Renditions drawn by the scene, ancestors before descendants. Regions added or removed
    /// since the last compile are only reflected after [`Scene::sync_renditions`].
    pub fn renditions(&self) -> &[RegionId] {
        &self.renditions
    }

    pub fn sync_renditions(&mut self, tree: &RegionTree) {
        if self.core.renditions_stale.get() {
            self.rebuild_renditions(tree);
        }
    }

    /// Adds one rendition in drawing order. Returns `false` if it was already present.
    pub fn add_rendition(&mut self, tree: &RegionTree, region: RegionId) -> Result<bool, SceneError> {
        if !tree.contains(region) {
            return Err(SceneError::UnknownRegion(region));
        }
        match self
            .renditions
            .binary_search_by(|existing| tree.compare_regions(*existing, region))
        {
            Ok(_) => Ok(false),
            Err(index) => {
                self.renditions.insert(index, region);
                self.core.changed_private(false);
                Ok(true)
            }
        }
    }

    pub fn remove_rendition(&mut self, region: RegionId) -> bool {
        let before = self.renditions.len();
        self.renditions.retain(|r| *r != region);
        let removed = self.renditions.len() != before;
        if removed {
            self.core.changed_private(false);
        }
        removed
    }

    /// The rendition whose position is used as the first pick name.
    pub fn rendition_of_position(&self, tree: &RegionTree, position: u32) -> Option<RegionId> {
        self.renditions
            .iter()
            .copied()
            .find(|r| tree.rendition(*r).map_or(false, |rendition| rendition.position() == position))
    }

    pub fn begin_cache(&mut self) {
        self.core.cache.set(self.core.cache.get() + 1);
    }

    /// Closes a cache bracket, notifying observers when the outermost one closes.
    pub fn end_cache(&mut self) -> Result<(), SceneError> {
        let depth = self.core.cache.get();
        if depth == 0 {
            error!("Scene \"{}\": end_cache without begin_cache", self.name);
            return Err(SceneError::CacheNotOpen);
        }
        self.core.cache.set(depth - 1);
        self.core.refresh();
        Ok(())
    }

    /// Reports a change to something drawn by the scene.
    pub fn changed(&mut self, fast_changing: bool) {
        self.core.notify_object_changed(fast_changing);
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn has_light(&self, name: &str) -> bool {
        self.lights.iter().any(|l| l.name == name)
    }

    pub fn add_light(&mut self, light: Light) -> Result<(), SceneError> {
        if self.has_light(&light.name) {
            return Err(SceneError::LightExists(light.name));
        }
        self.lights.push(light);
        self.core.changed_private(false);
        Ok(())
    }

    pub fn remove_light(&mut self, name: &str) -> Result<Light, SceneError> {
        let index = self
            .lights
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| SceneError::NoSuchLight(name.to_string()))?;
        let light = self.lights.remove(index);
        self.core.changed_private(false);
        Ok(light)
    }

    /// Appends a filter with the lowest priority.
    pub fn add_filter(&mut self, matcher: FilterMatch, action: FilterAction) -> FilterId {
        let id = FilterId(self.next_filter_id);
        self.next_filter_id += 1;
        self.filters.push(SceneFilter::new(id, matcher, action));
        self.core.changed_private(false);
        id
    }

    pub fn remove_filter(&mut self, id: FilterId) -> Result<SceneFilter, SceneError> {
        let index = self.filter_index(id)?;
        let filter = self.filters.remove(index);
        self.core.changed_private(false);
        Ok(filter)
    }

    pub fn clear_filters(&mut self) {
        if !self.filters.is_empty() {
            self.filters.clear();
            self.core.changed_private(false);
        }
    }

    pub fn number_of_filters(&self) -> usize {
        self.filters.len()
    }

    pub fn filters(&self) -> &[SceneFilter] {
        &self.filters
    }

    pub fn filter(&self, id: FilterId) -> Option<&SceneFilter> {
        self.filters.iter().find(|f| f.id() == id)
    }

    fn filter_index(&self, id: FilterId) -> Result<usize, SceneError> {
        self.filters
            .iter()
            .position(|f| f.id() == id)
            .ok_or(SceneError::FilterNotInScene(id))
    }

    /// 1-based priority of the filter; 1 is evaluated first.
    pub fn filter_priority(&self, id: FilterId) -> Option<usize> {
        self.filter_index(id).ok().map(|index| index + 1)
    }

    /// Moves the filter to the 1-based `priority`, or to the end if `priority` is 0.
    pub fn set_filter_priority(&mut self, id: FilterId, priority: usize) -> Result<(), SceneError> {
        let index = self.filter_index(id)?;
        if priority > self.filters.len() {
            return Err(SceneError::PriorityOutOfRange(priority));
        }
        let filter = self.filters.remove(index);
        let target = if priority == 0 { self.filters.len() } else { priority - 1 };
        self.filters.insert(target, filter);
        self.core.changed_private(false);
        Ok(())
    }

    pub fn filter_at_priority(&self, priority: usize) -> Option<&SceneFilter> {
        priority.checked_sub(1).and_then(|index| self.filters.get(index))
    }

    pub fn set_filter_action(&mut self, id: FilterId, action: FilterAction) -> Result<(), SceneError> {
        let index = self.filter_index(id)?;
        self.filters[index].set_action(action);
        self.core.changed_private(false);
        Ok(())
    }

    pub fn set_filter_inverse(&mut self, id: FilterId, inverse: bool) -> Result<(), SceneError> {
        let index = self.filter_index(id)?;
        self.filters[index].set_inverse(inverse);
        self.core.changed_private(false);
        Ok(())
    }

    /// The action of the first filter applying to the graphic decides; with no applicable
    /// filter the graphic is hidden.
    pub fn shows_graphic(&self, region: RegionId, graphic: &Graphic) -> bool {
        self.filters
            .iter()
            .find(|f| f.applies_to(region, graphic))
            .map_or(false, |f| f.action() == FilterAction::Show)
    }

    pub fn has_fast_changing_objects(&self, tree: &RegionTree) -> bool {
        self.renditions.iter().any(|region| {
            tree.rendition(*region).map_or(false, |rendition| {
                rendition
                    .graphics()
                    .iter()
                    .any(|g| g.fast_changing && self.shows_graphic(*region, g))
            })
        })
    }

    /// Requests that graphics objects be rebuilt on the next [`Scene::build`].
    pub fn request_build(&mut self) {
        self.build = true;
    }

    pub fn needs_build(&self) -> bool {
        self.build
    }

    /// Builds graphics objects if requested since the last build.
    pub fn build<R: Renderer + ?Sized>(&mut self, tree: &mut RegionTree, renderer: &mut R) -> Result<(), SceneError> {
        if self.build {
            self.build = false;
            self.compile_members(tree, renderer)?;
        }
        Ok(())
    }

    /// Compiles renditions that changed since they were last compiled, then lights.
    pub fn compile_members<R: Renderer + ?Sized>(
        &mut self,
        tree: &mut RegionTree,
        renderer: &mut R,
    ) -> Result<(), SceneError> {
        self.sync_renditions(tree);
        for region in self.renditions.clone() {
            let Some(r) = tree.region(region) else {
                continue;
            };
            if r.rendition().compile_status() != CompileStatus::Compiled {
                renderer.compile_rendition(r).map_err(SceneError::Renderer)?;
                tree.mark_rendition_compiled(region);
            }
        }
        for light in &self.lights {
            renderer.compile_light(light).map_err(SceneError::Renderer)?;
        }
        Ok(())
    }

    fn commands(&self, tree: &RegionTree, fast_changing: bool) -> CommandBuffer {
        let mut commands = CommandBuffer::new();
        commands.push(RenderCommand::PushName(0));
        for region in &self.renditions {
            let Some(rendition) = tree.rendition(*region) else {
                continue;
            };
            commands.push(RenderCommand::LoadName(rendition.position()));
            for (index, graphic) in rendition.graphics().iter().enumerate() {
                if graphic.fast_changing != fast_changing || !self.shows_graphic(*region, graphic) {
                    continue;
                }
                let position = index as u32 + 1;
                commands.push(RenderCommand::PushName(position));
                commands.push(RenderCommand::DrawGraphic {
                    region: *region,
                    graphic_position: position,
                });
                commands.push(RenderCommand::PopName);
            }
        }
        commands.push(RenderCommand::PopName);
        commands
    }

    fn upload<R: Renderer + ?Sized>(
        renderer: &mut R,
        slot: &mut Option<DisplayListHandle>,
        commands: &CommandBuffer,
    ) -> Result<(), SceneError> {
        let handle = match *slot {
            Some(handle) => handle,
            None => {
                let handle = renderer
                    .create_display_list()
                    .map_err(SceneError::DisplayListAllocation)?;
                *slot = Some(handle);
                handle
            }
        };
        renderer
            .upload_display_list(handle, commands)
            .map_err(SceneError::Renderer)
    }

    /// Regenerates the display lists if anything is not compiled. When only fast changing
    /// content changed, only the fast changing list is rebuilt. On failure the previous lists
    /// are kept.
    pub fn compile_display_lists<R: Renderer + ?Sized>(
        &mut self,
        tree: &RegionTree,
        renderer: &mut R,
    ) -> Result<(), SceneError> {
        if self.core.compile_status.get() == CompileStatus::Compiled {
            return Ok(());
        }
        let rebuild_main = self.display_list.is_none()
            || self.core.compile_status.get() == CompileStatus::NotCompiled
            || self.core.pending_rebuild.get() == ChangeStatus::Change;
        if rebuild_main {
            debug!("Scene \"{}\": rebuilding display list", self.name);
            let commands = self.commands(tree, false);
            Self::upload(renderer, &mut self.display_list, &commands)?;
        }
        if self.has_fast_changing_objects(tree) {
            debug!("Scene \"{}\": rebuilding fast changing display list", self.name);
            let commands = self.commands(tree, true);
            Self::upload(renderer, &mut self.fast_changing_display_list, &commands)?;
        } else if let Some(handle) = self.fast_changing_display_list.take() {
            renderer.delete_display_list(handle);
        }
        self.core.pending_rebuild.set(ChangeStatus::NoChange);
        self.core.compile_status.set(CompileStatus::Compiled);
        Ok(())
    }

    pub fn compile<R: Renderer + ?Sized>(&mut self, tree: &mut RegionTree, renderer: &mut R) -> Result<(), SceneError> {
        if self.core.compile_status.get() != CompileStatus::Compiled {
            self.compile_members(tree, renderer)?;
            self.compile_display_lists(tree, renderer)?;
        }
        Ok(())
    }

    /// Display lists last compiled, main list first.
    pub fn display_lists(&self) -> Vec<DisplayListHandle> {
        self.display_list
            .iter()
            .chain(self.fast_changing_display_list.iter())
            .copied()
            .collect()
    }

    /// Executes the last compiled display lists, even if they are out of date.
    pub fn execute<R: Renderer + ?Sized>(&self, renderer: &mut R) -> Result<(), SceneError> {
        let Some(main) = self.display_list else {
            return Err(SceneError::NotCompiled);
        };
        if self.core.compile_status.get() != CompileStatus::Compiled {
            warn!("Scene \"{}\": executing out of date display lists", self.name);
        }
        renderer.execute_display_list(main).map_err(SceneError::Renderer)?;
        if let Some(fast) = self.fast_changing_display_list {
            renderer.execute_display_list(fast).map_err(SceneError::Renderer)?;
        }
        Ok(())
    }

    /// Builds, compiles and executes the scene.
    pub fn render<R: Renderer + ?Sized>(&mut self, tree: &mut RegionTree, renderer: &mut R) -> Result<(), SceneError> {
        self.build(tree, renderer)?;
        self.compile(tree, renderer)?;
        self.execute(renderer)
    }

    /// Deletes the scene's display lists from the renderer.
    pub fn release_display_lists<R: Renderer + ?Sized>(&mut self, renderer: &mut R) {
        for handle in self.display_list.take().into_iter().chain(self.fast_changing_display_list.take()) {
            renderer.delete_display_list(handle);
        }
        self.core
            .compile_status
            .set(self.core.compile_status.get().degrade(CompileStatus::NotCompiled));
    }

    /// Picks the objects drawn inside `volume`. The select buffer is grown and the selection
    /// pass repeated while it overflows, up to the configured number of attempts.
    pub fn try_pick_objects<R: Renderer + ?Sized>(
        &mut self,
        tree: &mut RegionTree,
        renderer: &mut R,
        volume: &InteractionVolume,
    ) -> Result<PickedObjectList, PickError> {
        self.compile(tree, renderer).map_err(PickError::Compile)?;
        let lists = self.display_lists();
        let pick = self.settings.pick;
        for _ in 0..pick.max_attempts {
            let mut buffer = SelectBuffer::new(self.select_buffer_size);
            renderer
                .select(&lists, volume, &mut buffer)
                .map_err(PickError::Renderer)?;
            if buffer.overflowed() {
                self.select_buffer_size += pick.buffer_size_increment.max(1);
                debug!(
                    "Scene \"{}\": select buffer overflow, growing to {}",
                    self.name, self.select_buffer_size
                );
                continue;
            }
            let tree: &RegionTree = tree;
            return Ok(PickedObjectList::from_select_buffer(&buffer, |position| {
                self.rendition_of_position(tree, position)
            }));
        }
        Err(PickError::BufferOverflow {
            attempts: pick.max_attempts,
            buffer_size: self.select_buffer_size,
        })
    }

    /// As [`Scene::try_pick_objects`], but failures are logged and give an empty list.
    pub fn pick_objects<R: Renderer + ?Sized>(
        &mut self,
        tree: &mut RegionTree,
        renderer: &mut R,
        volume: &InteractionVolume,
    ) -> PickedObjectList {
        self.try_pick_objects(tree, renderer, volume).unwrap_or_else(|err| {
            error!("Scene \"{}\": pick failed: {}", self.name, err);
            PickedObjectList::new()
        })
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        if self.core.cache.get() > 0 {
            warn!("Scene \"{}\" dropped with an open cache bracket", self.name);
        }
        if self.region.is_some() {
            warn!("Scene \"{}\" dropped while attached to a region", self.name);
        }
    }
}
