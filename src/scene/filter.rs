use crate::region::RegionId;
use crate::rendition::{Graphic, GraphicType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterId(pub(crate) u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterAction {
    Show,
    Hide,
}

/// Predicate over the graphics of a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterMatch {
    All,
    /// Matches graphics whose visibility flag is set.
    VisibilityFlag,
    GraphicName(String),
    GraphicType(GraphicType),
    /// Matches graphics belonging to exactly this region.
    Region(RegionId),
    And(Vec<FilterMatch>),
    Or(Vec<FilterMatch>),
}

impl FilterMatch {
    pub fn matches(&self, region: RegionId, graphic: &Graphic) -> bool {
        match self {
            FilterMatch::All => true,
            FilterMatch::VisibilityFlag => graphic.visible,
            FilterMatch::GraphicName(name) => graphic.name == *name,
            FilterMatch::GraphicType(graphic_type) => graphic.graphic_type == *graphic_type,
            FilterMatch::Region(r) => *r == region,
            FilterMatch::And(matchers) => matchers.iter().all(|m| m.matches(region, graphic)),
            FilterMatch::Or(matchers) => matchers.iter().any(|m| m.matches(region, graphic)),
        }
    }
}

/// One entry of a scene's ordered filter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneFilter {
    id: FilterId,
    matcher: FilterMatch,
    action: FilterAction,
    inverse: bool,
}

impl SceneFilter {
    pub(crate) fn new(id: FilterId, matcher: FilterMatch, action: FilterAction) -> Self {
        Self {
            id,
            matcher,
            action,
            inverse: false,
        }
    }

    pub fn id(&self) -> FilterId {
        self.id
    }

    pub fn matcher(&self) -> &FilterMatch {
        &self.matcher
    }

    pub fn action(&self) -> FilterAction {
        self.action
    }

    pub fn is_inverse(&self) -> bool {
        self.inverse
    }

    pub(crate) fn set_action(&mut self, action: FilterAction) {
        self.action = action;
    }

    pub(crate) fn set_inverse(&mut self, inverse: bool) {
        self.inverse = inverse;
    }

    /// Whether the filter applies to the graphic, taking `inverse` into account.
    pub fn applies_to(&self, region: RegionId, graphic: &Graphic) -> bool {
        self.matcher.matches(region, graphic) != self.inverse
    }
}
