//! Rendering backend interface and retained command buffers.
//!
//! Scenes compile into [`CommandBuffer`]s which a [`Renderer`] turns into whatever its graphics
//! API needs. Pick names are part of the command stream, so a backend rendering in selection
//! mode reports hits with the same names the scene pushed.
use crate::picking::{InteractionVolume, SelectBuffer};
use crate::region::{Region, RegionId};
use crate::scene::Light;
use eyre::eyre;
use log::trace;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayListHandle(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderCommand {
    PushName(u32),
    /// Replaces the top of the name stack.
    LoadName(u32),
    PopName,
    /// Draws a compiled graphic. Graphics push their own names (element numbers etc.) while
    /// drawing.
    DrawGraphic { region: RegionId, graphic_position: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBuffer {
    commands: Vec<RenderCommand>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn draws(&self) -> impl Iterator<Item = (RegionId, u32)> + '_ {
        self.commands.iter().filter_map(|command| match command {
            RenderCommand::DrawGraphic {
                region,
                graphic_position,
            } => Some((*region, *graphic_position)),
            _ => None,
        })
    }
}

/// Graphics backend used by scenes to build, draw and pick.
pub trait Renderer {
    /// Builds the primitives of every graphic of the region's rendition.
    fn compile_rendition(&mut self, region: &Region) -> eyre::Result<()>;

    fn compile_light(&mut self, light: &Light) -> eyre::Result<()>;

    fn create_display_list(&mut self) -> eyre::Result<DisplayListHandle>;

    fn upload_display_list(&mut self, handle: DisplayListHandle, commands: &CommandBuffer) -> eyre::Result<()>;

    fn execute_display_list(&mut self, handle: DisplayListHandle) -> eyre::Result<()>;

    fn delete_display_list(&mut self, handle: DisplayListHandle);

    /// Renders `lists` in selection mode, writing one hit record per picked primitive into
    /// `buffer`. Running out of room is reported through the buffer, not as an error.
    fn select(
        &mut self,
        lists: &[DisplayListHandle],
        volume: &InteractionVolume,
        buffer: &mut SelectBuffer,
    ) -> eyre::Result<()>;
}

/// A primitive hit while drawing one graphic in selection mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicHit {
    /// Names pushed by the graphic itself, after the scene's names.
    pub names: Vec<u32>,
    pub near: u32,
    pub far: u32,
}

/// Software backend interpreting command buffers with an explicit name stack.
///
/// Hits are produced by a caller supplied function deciding which primitives of a graphic
/// fall within the interaction volume. Useful for headless picking and for tests.
pub struct NameStackRenderer<F> {
    hit_source: F,
    lists: FxHashMap<u32, CommandBuffer>,
    next_handle: u32,
    display_list_limit: Option<usize>,
    compiled_renditions: Vec<RegionId>,
    compiled_lights: Vec<String>,
    executed: Vec<DisplayListHandle>,
}

impl<F> NameStackRenderer<F>
where
    F: FnMut(&InteractionVolume, RegionId, u32) -> Vec<GraphicHit>,
{
    pub fn new(hit_source: F) -> Self {
        Self {
            hit_source,
            lists: FxHashMap::default(),
            next_handle: 1,
            display_list_limit: None,
            compiled_renditions: Vec::new(),
            compiled_lights: Vec::new(),
            executed: Vec::new(),
        }
    }

    /// Limits how many display lists can exist at once, like a backend with finite resources.
    pub fn with_display_list_limit(mut self, limit: usize) -> Self {
        self.display_list_limit = Some(limit);
        self
    }

    pub fn set_display_list_limit(&mut self, limit: Option<usize>) {
        self.display_list_limit = limit;
    }

    pub fn display_list(&self, handle: DisplayListHandle) -> Option<&CommandBuffer> {
        self.lists.get(&handle.0)
    }

    pub fn number_of_display_lists(&self) -> usize {
        self.lists.len()
    }

    /// Regions whose renditions were compiled, in compile order.
    pub fn compiled_renditions(&self) -> &[RegionId] {
        &self.compiled_renditions
    }

    pub fn compiled_lights(&self) -> &[String] {
        &self.compiled_lights
    }

    /// Display lists executed, in execution order.
    pub fn executed(&self) -> &[DisplayListHandle] {
        &self.executed
    }
}

impl<F> Renderer for NameStackRenderer<F>
where
    F: FnMut(&InteractionVolume, RegionId, u32) -> Vec<GraphicHit>,
{
    fn compile_rendition(&mut self, region: &Region) -> eyre::Result<()> {
        let rendition = region.rendition();
        trace!("Compiling {} graphics of region \"{}\"", rendition.number_of_graphics(), region.name());
        self.compiled_renditions.push(rendition.region());
        Ok(())
    }

    fn compile_light(&mut self, light: &Light) -> eyre::Result<()> {
        self.compiled_lights.push(light.name.clone());
        Ok(())
    }

    fn create_display_list(&mut self) -> eyre::Result<DisplayListHandle> {
        if let Some(limit) = self.display_list_limit {
            if self.lists.len() >= limit {
                return Err(eyre!("Display list limit of {} reached", limit));
            }
        }
        let handle = DisplayListHandle(self.next_handle);
        self.next_handle += 1;
        self.lists.insert(handle.0, CommandBuffer::new());
        Ok(handle)
    }

    fn upload_display_list(&mut self, handle: DisplayListHandle, commands: &CommandBuffer) -> eyre::Result<()> {
        let list = self
            .lists
            .get_mut(&handle.0)
            .ok_or_else(|| eyre!("Unknown display list {}", handle.0))?;
        *list = commands.clone();
        Ok(())
    }

    fn execute_display_list(&mut self, handle: DisplayListHandle) -> eyre::Result<()> {
        if !self.lists.contains_key(&handle.0) {
            return Err(eyre!("Unknown display list {}", handle.0));
        }
        self.executed.push(handle);
        Ok(())
    }

    fn delete_display_list(&mut self, handle: DisplayListHandle) {
        self.lists.remove(&handle.0);
    }

    fn select(
        &mut self,
        lists: &[DisplayListHandle],
        volume: &InteractionVolume,
        buffer: &mut SelectBuffer,
    ) -> eyre::Result<()> {
        let mut stack: Vec<u32> = Vec::new();
        for handle in lists {
            let list = self
                .lists
                .get(&handle.0)
                .ok_or_else(|| eyre!("Unknown display list {}", handle.0))?;
            for command in list.commands() {
                match command {
                    RenderCommand::PushName(name) => stack.push(*name),
                    RenderCommand::LoadName(name) => match stack.last_mut() {
                        Some(top) => *top = *name,
                        None => return Err(eyre!("LoadName with empty name stack")),
                    },
                    RenderCommand::PopName => {
                        stack
                            .pop()
                            .ok_or_else(|| eyre!("PopName with empty name stack"))?;
                    }
                    RenderCommand::DrawGraphic {
                        region,
                        graphic_position,
                    } => {
                        for hit in (self.hit_source)(volume, *region, *graphic_position) {
                            let names: Vec<u32> = stack.iter().chain(&hit.names).copied().collect();
                            if !buffer.push_hit(&names, hit.near, hit.far) {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
