//! Renditions: the graphics drawn for one region, and their change state.
use crate::callback::CallbackList;
use crate::field::FieldId;
use crate::region::RegionId;
use serde::{Deserialize, Serialize};

/// Pending change classification. A general change dominates a fast change.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChangeStatus {
    #[default]
    NoChange,
    /// Only fast changing content (e.g. time varying glyphs) needs redrawing.
    FastChange,
    Change,
}

impl ChangeStatus {
    pub fn merge(self, other: ChangeStatus) -> ChangeStatus {
        self.max(other)
    }

    pub fn is_changed(self) -> bool {
        self != ChangeStatus::NoChange
    }
}

/// How much of the compiled graphics is out of date, ordered from clean to dirty.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompileStatus {
    Compiled,
    ChildNotCompiled,
    #[default]
    NotCompiled,
}

impl CompileStatus {
    /// The dirtier of the two; compile status never becomes cleaner except by compiling.
    pub fn degrade(self, to: CompileStatus) -> CompileStatus {
        self.max(to)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphicType {
    Lines,
    Cylinders,
    Surfaces,
    Contours,
    Streamlines,
    NodePoints,
    DataPoints,
    ElementPoints,
    Points,
}

/// How element points are placed in each element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum XiDiscretizationMode {
    CellCentres,
    CellCorners,
    /// A single point at a fixed chart location.
    ExactXi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graphic {
    pub name: String,
    pub graphic_type: GraphicType,
    pub coordinate_field: Option<FieldId>,
    pub data_field: Option<FieldId>,
    pub material: String,
    pub visible: bool,
    /// Compiled into the fast changing display list.
    pub fast_changing: bool,
    /// Redrawn when the region time changes.
    pub time_dependent: bool,
    /// Restricts element graphics to one face number of top-level elements.
    pub face: Option<usize>,
    pub discretization: XiDiscretizationMode,
    pub number_in_xi: [usize; 3],
    pub exact_xi: [f64; 3],
}

impl Graphic {
    pub fn new(name: &str, graphic_type: GraphicType) -> Self {
        Self {
            name: name.to_string(),
            graphic_type,
            coordinate_field: None,
            data_field: None,
            material: "default".to_string(),
            visible: true,
            fast_changing: false,
            time_dependent: false,
            face: None,
            discretization: XiDiscretizationMode::CellCentres,
            number_in_xi: [1, 1, 1],
            exact_xi: [0.5, 0.5, 0.5],
        }
    }

    pub fn with_coordinate_field(mut self, field: FieldId) -> Self {
        self.coordinate_field = Some(field);
        self
    }

    pub fn with_material(mut self, material: &str) -> Self {
        self.material = material.to_string();
        self
    }

    pub fn with_visibility(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn fast_changing(mut self) -> Self {
        self.fast_changing = true;
        self
    }

    pub fn time_dependent(mut self) -> Self {
        self.time_dependent = true;
        self
    }

    pub fn with_discretization(mut self, mode: XiDiscretizationMode, number_in_xi: [usize; 3]) -> Self {
        self.discretization = mode;
        self.number_in_xi = number_in_xi;
        self
    }

    /// Whether picking this graphic can select elements.
    pub fn selects_elements(&self) -> bool {
        matches!(
            self.graphic_type,
            GraphicType::Lines
                | GraphicType::Cylinders
                | GraphicType::Surfaces
                | GraphicType::Contours
                | GraphicType::ElementPoints
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenditionEventKind {
    Changed(ChangeStatus),
    ChildAdded(RegionId),
    ChildRemoved(RegionId),
}

/// Sent to the callbacks of the changed region and all of its ancestors.
#[derive(Debug, Clone, PartialEq)]
pub struct RenditionEvent {
    pub region: RegionId,
    pub kind: RenditionEventKind,
}

/// The drawable content of one region.
///
/// Renditions are owned by their region in the [`RegionTree`](crate::region::RegionTree) and
/// modified through it, so that change notification always reaches observers.
#[derive(Debug)]
pub struct Rendition {
    region: RegionId,
    position: u32,
    graphics: Vec<Graphic>,
    pub(crate) cache: u32,
    pub(crate) pending: ChangeStatus,
    pub(crate) compile_status: CompileStatus,
    pub(crate) callbacks: CallbackList<RenditionEvent>,
}

impl Rendition {
    pub(crate) fn new(region: RegionId, position: u32) -> Self {
        Self {
            region,
            position,
            graphics: Vec::new(),
            cache: 0,
            pending: ChangeStatus::NoChange,
            compile_status: CompileStatus::NotCompiled,
            callbacks: CallbackList::new(),
        }
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Identifies the rendition as the first name of pick records. Unique within a tree.
    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn graphics(&self) -> &[Graphic] {
        &self.graphics
    }

    pub fn number_of_graphics(&self) -> usize {
        self.graphics.len()
    }

    /// Graphics are numbered from 1 in drawing order.
    pub fn graphic_at_position(&self, position: u32) -> Option<&Graphic> {
        (position as usize)
            .checked_sub(1)
            .and_then(|index| self.graphics.get(index))
    }

    pub fn find_graphic_by_name(&self, name: &str) -> Option<(u32, &Graphic)> {
        self.graphics
            .iter()
            .enumerate()
            .find(|(_, graphic)| graphic.name == name)
            .map(|(index, graphic)| (index as u32 + 1, graphic))
    }

    pub fn has_fast_changing_graphics(&self) -> bool {
        self.graphics.iter().any(|g| g.fast_changing)
    }

    pub fn has_time_dependent_graphics(&self) -> bool {
        self.graphics.iter().any(|g| g.time_dependent)
    }

    pub fn compile_status(&self) -> CompileStatus {
        self.compile_status
    }

    pub fn pending_change(&self) -> ChangeStatus {
        self.pending
    }

    pub fn is_cached(&self) -> bool {
        self.cache > 0
    }

    pub(crate) fn push_graphic(&mut self, graphic: Graphic) -> u32 {
        self.graphics.push(graphic);
        self.graphics.len() as u32
    }

    pub(crate) fn take_graphic(&mut self, position: u32) -> Option<Graphic> {
        let index = (position as usize).checked_sub(1)?;
        (index < self.graphics.len()).then(|| self.graphics.remove(index))
    }

    pub(crate) fn graphic_mut(&mut self, position: u32) -> Option<&mut Graphic> {
        let index = (position as usize).checked_sub(1)?;
        self.graphics.get_mut(index)
    }

    /// Records a change; graphics need recompiling whatever the kind of change.
    pub(crate) fn mark_changed(&mut self, status: ChangeStatus) {
        if status.is_changed() {
            self.pending = self.pending.merge(status);
            self.compile_status = self.compile_status.degrade(CompileStatus::NotCompiled);
        }
    }
}
