//! The resource tree.
//!
//! Every piece of labware is a node in a slot-arena forest: decks, carriers,
//! racks, plates, wells, tip spots. Nodes own their children by id; the
//! parent link is an id used only for upward walks (absolute coordinates,
//! hook propagation), never for ownership. Detached roots are free
//! resources waiting to be assigned somewhere.
//!
//! ## Assignment hooks
//!
//! Each node carries four hook lists: will-assign, did-assign,
//! will-unassign, did-unassign. When a resource is assigned anywhere in a
//! subtree, the hooks of every ancestor fire, nearest ancestor first. A
//! will-assign hook that returns an error vetoes the assignment before any
//! mutation. Decks use these hooks to maintain their name index and to
//! reject duplicate names.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coordinate::Coordinate;
use crate::errors::LabwareError;
use crate::rotation::Rotation;
use crate::tip::TipSpotState;
use crate::well::WellState;

// ── Ids ───────────────────────────────────────────────────────────────────────

/// Handle to a node. Generation-tagged so handles to removed nodes go stale
/// instead of silently aliasing a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

// ── Anchors ───────────────────────────────────────────────────────────────────

/// Horizontal anchor within a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XAnchor {
    Left,
    Center,
    Right,
}

/// Depth anchor within a resource. Front is y = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YAnchor {
    Front,
    Center,
    Back,
}

/// Vertical anchor within a resource. `CavityBottom` is the inner floor of
/// a container, i.e. the outer bottom plus the material thickness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZAnchor {
    Bottom,
    CavityBottom,
    Center,
    Top,
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Axis a [`ResourceData::Stack`] grows along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackDirection {
    X,
    Y,
    Z,
}

/// Grid shape of an itemized resource (plate wells, tip-rack spots).
/// Children are stored column-major: A1, B1, .. H1, A2, ..
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridData {
    pub num_cols: u8,
    pub num_rows: u8,
}

impl GridData {
    /// Parse an A1-style identifier into a child index.
    pub fn index_of(&self, identifier: &str) -> Result<usize, LabwareError> {
        let mut chars = identifier.chars();
        let row_char = chars
            .next()
            .ok_or_else(|| LabwareError::InvalidArgument("empty well identifier".into()))?;
        let row = (row_char.to_ascii_uppercase() as i32) - ('A' as i32);
        let col: i32 = chars
            .as_str()
            .parse::<i32>()
            .map_err(|_| {
                LabwareError::InvalidArgument(format!("bad well identifier '{identifier}'"))
            })?
            - 1;
        if row < 0 || row >= self.num_rows as i32 || col < 0 || col >= self.num_cols as i32 {
            return Err(LabwareError::InvalidArgument(format!(
                "identifier '{identifier}' outside {}x{} grid",
                self.num_rows, self.num_cols
            )));
        }
        Ok(col as usize * self.num_rows as usize + row as usize)
    }
}

/// What a node is, beyond its box. Replaces a subclass hierarchy; the
/// serialized `type` string maps onto these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceData {
    Generic,
    Deck,
    Trash,
    TipSpot(TipSpotState),
    TipRack(GridData),
    Well(WellState),
    Plate(GridData),
    Carrier,
    /// A single carrier site. Plates sit `pedestal_size_z` above the
    /// holder origin.
    Holder { pedestal_size_z: f64 },
    Stack { direction: StackDirection },
}

impl ResourceData {
    /// The `type` string used in serialized layouts.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Generic => "Resource",
            Self::Deck => "Deck",
            Self::Trash => "Trash",
            Self::TipSpot(_) => "TipSpot",
            Self::TipRack(_) => "TipRack",
            Self::Well(_) => "Well",
            Self::Plate(_) => "Plate",
            Self::Carrier => "Carrier",
            Self::Holder { .. } => "ResourceHolder",
            Self::Stack { .. } => "ResourceStack",
        }
    }
}

// ── Hooks ─────────────────────────────────────────────────────────────────────

/// Veto-capable hook, fired before a (dis)assignment mutates the tree.
pub type WillHook =
    Arc<dyn Fn(&ResourceTree, NodeId) -> Result<(), LabwareError> + Send + Sync>;
/// Notification hook, fired after the tree has been mutated.
pub type DidHook = Arc<dyn Fn(&ResourceTree, NodeId) + Send + Sync>;

#[derive(Default, Clone)]
struct HookSet {
    will_assign: Vec<WillHook>,
    did_assign: Vec<DidHook>,
    will_unassign: Vec<WillHook>,
    did_unassign: Vec<DidHook>,
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

struct Node {
    generation: u32,
    name: String,
    size_x: f64,
    size_y: f64,
    size_z: f64,
    rotation: Rotation,
    location: Option<Coordinate>,
    category: Option<String>,
    model: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: ResourceData,
    hooks: HookSet,
}

/// Constructor bundle for a new node.
#[derive(Debug, Clone)]
pub struct ResourceInit {
    pub name: String,
    pub size_x: f64,
    pub size_y: f64,
    pub size_z: f64,
    pub rotation: Rotation,
    pub category: Option<String>,
    pub model: Option<String>,
    pub data: ResourceData,
}

impl ResourceInit {
    pub fn new(name: impl Into<String>, size_x: f64, size_y: f64, size_z: f64) -> Self {
        Self {
            name: name.into(),
            size_x,
            size_y,
            size_z,
            rotation: Rotation::identity(),
            category: None,
            model: None,
            data: ResourceData::Generic,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn data(mut self, data: ResourceData) -> Self {
        self.data = data;
        self
    }
}

// ── Tree ──────────────────────────────────────────────────────────────────────

/// Slot arena holding a forest of resources.
#[derive(Default)]
pub struct ResourceTree {
    slots: Vec<Option<Node>>,
    generations: Vec<u32>,
    free_list: Vec<usize>,
}

impl ResourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached resource. It becomes part of the forest but has no
    /// parent until assigned.
    pub fn add(&mut self, init: ResourceInit) -> NodeId {
        let index = match self.free_list.pop() {
            Some(i) => i,
            None => {
                self.slots.push(None);
                self.generations.push(0);
                self.slots.len() - 1
            }
        };
        let generation = self.generations[index];
        self.slots[index] = Some(Node {
            generation,
            name: init.name,
            size_x: init.size_x,
            size_y: init.size_y,
            size_z: init.size_z,
            rotation: init.rotation,
            location: None,
            category: init.category,
            model: init.model,
            parent: None,
            children: Vec::new(),
            data: init.data,
            hooks: HookSet::default(),
        });
        NodeId {
            index: index as u32,
            generation,
        }
    }

    fn node(&self, id: NodeId) -> Result<&Node, LabwareError> {
        self.slots
            .get(id.index as usize)
            .and_then(|slot| slot.as_ref())
            .filter(|n| n.generation == id.generation)
            .ok_or(LabwareError::StaleNodeId)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, LabwareError> {
        self.slots
            .get_mut(id.index as usize)
            .and_then(|slot| slot.as_mut())
            .filter(|n| n.generation == id.generation)
            .ok_or(LabwareError::StaleNodeId)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// Destroy a detached subtree. Slots are recycled; outstanding ids for
    /// the destroyed nodes go stale.
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<(), LabwareError> {
        if self.node(id)?.parent.is_some() {
            return Err(LabwareError::InvalidArgument(
                "cannot remove an assigned resource, unassign it first".into(),
            ));
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current)?;
            stack.extend(node.children.iter().copied());
            let index = current.index as usize;
            self.slots[index] = None;
            self.generations[index] = self.generations[index].wrapping_add(1);
            self.free_list.push(index);
        }
        Ok(())
    }

    // ── Field access ─────────────────────────────────────────────────────────

    pub fn name(&self, id: NodeId) -> Result<&str, LabwareError> {
        Ok(&self.node(id)?.name)
    }

    /// Rename a resource. Forbidden while it is assigned, since decks index
    /// by name.
    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> Result<(), LabwareError> {
        let node = self.node_mut(id)?;
        if node.parent.is_some() {
            return Err(LabwareError::InvalidArgument(
                "cannot rename a resource that is assigned".into(),
            ));
        }
        node.name = name.into();
        Ok(())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, LabwareError> {
        Ok(self.node(id)?.parent)
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], LabwareError> {
        Ok(&self.node(id)?.children)
    }

    pub fn location(&self, id: NodeId) -> Result<Option<Coordinate>, LabwareError> {
        Ok(self.node(id)?.location)
    }

    /// Set the location directly. Normal code paths set locations through
    /// assignment; this exists for deserialization and layout tweaking.
    pub fn set_location(
        &mut self,
        id: NodeId,
        location: Option<Coordinate>,
    ) -> Result<(), LabwareError> {
        self.node_mut(id)?.location = location;
        Ok(())
    }

    pub fn rotation(&self, id: NodeId) -> Result<Rotation, LabwareError> {
        Ok(self.node(id)?.rotation)
    }

    pub fn category(&self, id: NodeId) -> Result<Option<&str>, LabwareError> {
        Ok(self.node(id)?.category.as_deref())
    }

    pub fn model(&self, id: NodeId) -> Result<Option<&str>, LabwareError> {
        Ok(self.node(id)?.model.as_deref())
    }

    pub fn data(&self, id: NodeId) -> Result<&ResourceData, LabwareError> {
        Ok(&self.node(id)?.data)
    }

    pub fn data_mut(&mut self, id: NodeId) -> Result<&mut ResourceData, LabwareError> {
        Ok(&mut self.node_mut(id)?.data)
    }

    /// Rotate counter-clockwise around z by the given number of degrees.
    pub fn rotate_z(&mut self, id: NodeId, degrees: f64) -> Result<(), LabwareError> {
        let node = self.node_mut(id)?;
        node.rotation = node.rotation + Rotation::new(0.0, 0.0, degrees);
        Ok(())
    }

    // ── Local geometry ───────────────────────────────────────────────────────

    /// Local size along x. Stacks compute their size from their children.
    pub fn size_x(&self, id: NodeId) -> Result<f64, LabwareError> {
        self.stacked_size(id, StackDirection::X, |n| n.size_x)
    }

    pub fn size_y(&self, id: NodeId) -> Result<f64, LabwareError> {
        self.stacked_size(id, StackDirection::Y, |n| n.size_y)
    }

    pub fn size_z(&self, id: NodeId) -> Result<f64, LabwareError> {
        self.stacked_size(id, StackDirection::Z, |n| n.size_z)
    }

    fn stacked_size(
        &self,
        id: NodeId,
        axis: StackDirection,
        field: fn(&Node) -> f64,
    ) -> Result<f64, LabwareError> {
        let node = self.node(id)?;
        let ResourceData::Stack { direction } = node.data else {
            return Ok(field(node));
        };
        if node.children.is_empty() {
            return Ok(0.0);
        }
        let mut sum = 0.0;
        let mut max = 0.0_f64;
        for &child in &node.children {
            let s = self.stacked_size(child, axis, field)?;
            sum += s;
            max = max.max(s);
        }
        Ok(if direction == axis { sum } else { max })
    }

    /// Anchor point in the resource's local frame, measured from the left
    /// front bottom corner.
    pub fn anchor(
        &self,
        id: NodeId,
        x: XAnchor,
        y: YAnchor,
        z: ZAnchor,
    ) -> Result<Coordinate, LabwareError> {
        let node = self.node(id)?;
        let ax = match x {
            XAnchor::Left => 0.0,
            XAnchor::Center => self.size_x(id)? / 2.0,
            XAnchor::Right => self.size_x(id)?,
        };
        let ay = match y {
            YAnchor::Front => 0.0,
            YAnchor::Center => self.size_y(id)? / 2.0,
            YAnchor::Back => self.size_y(id)?,
        };
        let az = match z {
            ZAnchor::Bottom => 0.0,
            ZAnchor::CavityBottom => match &node.data {
                ResourceData::Well(well) => well.material_z_thickness,
                ResourceData::Trash => 0.0,
                _ => {
                    return Err(LabwareError::InvalidArgument(format!(
                        "resource '{}' has no cavity bottom",
                        node.name
                    )))
                }
            },
            ZAnchor::Center => self.size_z(id)? / 2.0,
            ZAnchor::Top => self.size_z(id)?,
        };
        Ok(Coordinate::new(ax, ay, az))
    }

    /// Center of the footprint (z = 0), the usual channel target.
    pub fn center(&self, id: NodeId) -> Result<Coordinate, LabwareError> {
        Ok(Coordinate::new(
            self.size_x(id)? / 2.0,
            self.size_y(id)? / 2.0,
            0.0,
        ))
    }

    /// Equally spaced interior points, `xn` by `yn` by `zn` of them.
    pub fn centers(
        &self,
        id: NodeId,
        xn: usize,
        yn: usize,
        zn: usize,
    ) -> Result<Vec<Coordinate>, LabwareError> {
        fn spaced(n: usize, size: f64) -> Vec<f64> {
            if n == 0 {
                return vec![0.0];
            }
            (0..n).map(|i| (i + 1) as f64 * size / (n + 1) as f64).collect()
        }
        let xs = spaced(xn, self.size_x(id)?);
        let ys = spaced(yn, self.size_y(id)?);
        let zs = spaced(zn, self.size_z(id)?);
        let mut out = Vec::with_capacity(xs.len() * ys.len() * zs.len());
        for &z in &zs {
            for &y in &ys {
                for &x in &xs {
                    out.push(Coordinate::new(x, y, z));
                }
            }
        }
        Ok(out)
    }

    // ── Absolute geometry ────────────────────────────────────────────────────

    /// Rotation composed with all ancestors.
    pub fn absolute_rotation(&self, id: NodeId) -> Result<Rotation, LabwareError> {
        let node = self.node(id)?;
        match node.parent {
            None => Ok(node.rotation),
            Some(parent) => Ok(self.absolute_rotation(parent)? + node.rotation),
        }
    }

    /// Absolute location of an anchor point of this resource.
    ///
    /// Walks up the tree, rotating each local location by the parent's
    /// absolute rotation. Fails if any resource on the path has no
    /// location.
    pub fn absolute_location(
        &self,
        id: NodeId,
        x: XAnchor,
        y: YAnchor,
        z: ZAnchor,
    ) -> Result<Coordinate, LabwareError> {
        let node = self.node(id)?;
        let location = node
            .location
            .ok_or_else(|| LabwareError::NoLocation(node.name.clone()))?;
        let rotated_anchor = self
            .absolute_rotation(id)?
            .apply(self.anchor(id, x, y, z)?);
        match node.parent {
            None => Ok(location + rotated_anchor),
            Some(parent) => {
                let parent_pos =
                    self.absolute_location(parent, XAnchor::Left, YAnchor::Front, ZAnchor::Bottom)?;
                let rotated_location = self.absolute_rotation(parent)?.apply(location);
                Ok(parent_pos + rotated_location + rotated_anchor)
            }
        }
    }

    /// Absolute location of the left front bottom corner.
    pub fn absolute_origin(&self, id: NodeId) -> Result<Coordinate, LabwareError> {
        self.absolute_location(id, XAnchor::Left, YAnchor::Front, ZAnchor::Bottom)
    }

    fn rotated_corners(&self, id: NodeId) -> Result<[Coordinate; 8], LabwareError> {
        let sx = self.size_x(id)?;
        let sy = self.size_y(id)?;
        let sz = self.size_z(id)?;
        let rotation = self.absolute_rotation(id)?;
        let corners = [
            Coordinate::new(0.0, 0.0, 0.0),
            Coordinate::new(sx, 0.0, 0.0),
            Coordinate::new(0.0, sy, 0.0),
            Coordinate::new(sx, sy, 0.0),
            Coordinate::new(0.0, 0.0, sz),
            Coordinate::new(sx, 0.0, sz),
            Coordinate::new(0.0, sy, sz),
            Coordinate::new(sx, sy, sz),
        ];
        Ok(corners.map(|c| rotation.apply(c)))
    }

    /// Extent of the rotated bounding box along x.
    pub fn absolute_size_x(&self, id: NodeId) -> Result<f64, LabwareError> {
        let corners = self.rotated_corners(id)?;
        let (min, max) = min_max(corners.iter().map(|c| c.x));
        Ok(max - min)
    }

    pub fn absolute_size_y(&self, id: NodeId) -> Result<f64, LabwareError> {
        let corners = self.rotated_corners(id)?;
        let (min, max) = min_max(corners.iter().map(|c| c.y));
        Ok(max - min)
    }

    pub fn absolute_size_z(&self, id: NodeId) -> Result<f64, LabwareError> {
        let corners = self.rotated_corners(id)?;
        let (min, max) = min_max(corners.iter().map(|c| c.z));
        Ok(max - min)
    }

    /// Where a child rotated by 90-degree steps must have its origin so
    /// that its footprint stays in the parent's positive quadrant.
    pub fn child_location_for_rotation(&self, child: NodeId) -> Result<Coordinate, LabwareError> {
        let rotation = self.rotation(child)?;
        if !rotation.is_axis_aligned() {
            return Err(LabwareError::InvalidArgument(
                "placement rotation must be a multiple of 90 degrees around z only".into(),
            ));
        }
        let sx = self.size_x(child)?;
        let sy = self.size_y(child)?;
        Ok(match rotation.z.rem_euclid(360.0) as i64 {
            0 => Coordinate::zero(),
            90 => Coordinate::new(sy, 0.0, 0.0),
            180 => Coordinate::new(sx, sy, 0.0),
            270 => Coordinate::new(0.0, sx, 0.0),
            _ => unreachable!("axis aligned rotation"),
        })
    }

    // ── Tree queries ─────────────────────────────────────────────────────────

    /// All descendants of a node, depth first, not including the node.
    pub fn descendants(&self, id: NodeId) -> Result<Vec<NodeId>, LabwareError> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id)?.children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.node(current)?.children.iter().rev().copied());
        }
        Ok(out)
    }

    /// First resource with this name in the subtree (the subtree root
    /// included), depth first.
    pub fn get_resource(&self, root: NodeId, name: &str) -> Result<NodeId, LabwareError> {
        if self.node(root)?.name == name {
            return Ok(root);
        }
        for &child in &self.node(root)?.children {
            if let Ok(found) = self.get_resource(child, name) {
                return Ok(found);
            }
        }
        Err(LabwareError::ResourceNotFound(name.to_string()))
    }

    /// Root of the tree a node belongs to (the node itself if detached).
    pub fn root_of(&self, id: NodeId) -> Result<NodeId, LabwareError> {
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    fn ancestors_from(&self, id: NodeId) -> Result<Vec<NodeId>, LabwareError> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            chain.push(parent);
            current = parent;
        }
        Ok(chain)
    }

    // ── Hooks ────────────────────────────────────────────────────────────────

    pub fn register_will_assign(&mut self, id: NodeId, hook: WillHook) -> Result<(), LabwareError> {
        self.node_mut(id)?.hooks.will_assign.push(hook);
        Ok(())
    }

    pub fn register_did_assign(&mut self, id: NodeId, hook: DidHook) -> Result<(), LabwareError> {
        self.node_mut(id)?.hooks.did_assign.push(hook);
        Ok(())
    }

    pub fn register_will_unassign(
        &mut self,
        id: NodeId,
        hook: WillHook,
    ) -> Result<(), LabwareError> {
        self.node_mut(id)?.hooks.will_unassign.push(hook);
        Ok(())
    }

    pub fn register_did_unassign(&mut self, id: NodeId, hook: DidHook) -> Result<(), LabwareError> {
        self.node_mut(id)?.hooks.did_unassign.push(hook);
        Ok(())
    }

    // ── Assignment ───────────────────────────────────────────────────────────

    /// Assign `child` under `parent` at `location` (parent frame).
    ///
    /// With `location == None` the location is computed for parents that
    /// know where children go: stacks place at the growing edge, holders
    /// apply rotation compensation and their pedestal height.
    ///
    /// Will-assign hooks of the parent chain run first, nearest ancestor
    /// first; any error aborts with the tree untouched. After the mutation
    /// the did-assign hooks run in the same order.
    pub fn assign_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        location: Option<Coordinate>,
        reassign: bool,
    ) -> Result<(), LabwareError> {
        self.check_assignment(parent, child, reassign)?;

        let location = match location {
            Some(location) => location,
            None => self.default_child_location(parent, child)?,
        };

        let chain = self.ancestors_from(parent)?;
        for &ancestor in &chain {
            let hooks = self.node(ancestor)?.hooks.will_assign.clone();
            for hook in hooks {
                hook(self, child)?;
            }
        }

        // A sanctioned migration detaches from the old parent first, with
        // the old chain's unassign hooks. No mutation has happened yet, so
        // a veto from either chain still leaves the tree unchanged.
        if self.node(child)?.parent.is_some() {
            self.unassign(child)?;
        }

        {
            let child_node = self.node_mut(child)?;
            child_node.parent = Some(parent);
            child_node.location = Some(location);
        }
        self.node_mut(parent)?.children.push(child);

        for &ancestor in &chain {
            let hooks = self.node(ancestor)?.hooks.did_assign.clone();
            for hook in hooks {
                hook(self, child);
            }
        }
        Ok(())
    }

    fn check_assignment(
        &self,
        parent: NodeId,
        child: NodeId,
        reassign: bool,
    ) -> Result<(), LabwareError> {
        let child_node = self.node(child)?;
        let parent_node = self.node(parent)?;
        if parent == child {
            return Err(LabwareError::InvalidAssignment(format!(
                "cannot assign resource '{}' to itself",
                child_node.name
            )));
        }
        if self.ancestors_from(parent)?.contains(&child) {
            return Err(LabwareError::InvalidAssignment(format!(
                "cannot assign resource '{}' below its own descendant",
                child_node.name
            )));
        }
        if let Some(existing) = child_node.parent {
            let existing_name = &self.node(existing)?.name;
            if existing == parent {
                if reassign {
                    warn!(
                        "resource '{}' already assigned to '{}'",
                        child_node.name, parent_node.name
                    );
                } else {
                    return Err(LabwareError::InvalidAssignment(format!(
                        "will not reassign resource '{}' to the same parent '{}'",
                        child_node.name, existing_name
                    )));
                }
            } else if !reassign {
                return Err(LabwareError::InvalidAssignment(format!(
                    "will not assign resource '{}' that already has a parent '{}'",
                    child_node.name, existing_name
                )));
            }
        }
        Ok(())
    }

    fn default_child_location(
        &self,
        parent: NodeId,
        child: NodeId,
    ) -> Result<Coordinate, LabwareError> {
        match self.node(parent)?.data {
            ResourceData::Stack { direction } => {
                let compensation = self.child_location_for_rotation(child)?;
                let edge = match direction {
                    StackDirection::X => Coordinate::new(self.size_x(parent)?, 0.0, 0.0),
                    StackDirection::Y => Coordinate::new(0.0, self.size_y(parent)?, 0.0),
                    StackDirection::Z => Coordinate::new(0.0, 0.0, self.size_z(parent)?),
                };
                Ok(compensation + edge)
            }
            ResourceData::Holder { pedestal_size_z } => {
                let compensation = self.child_location_for_rotation(child)?;
                Ok(compensation + Coordinate::new(0.0, 0.0, pedestal_size_z))
            }
            _ => Err(LabwareError::InvalidArgument(format!(
                "resource '{}' does not place children automatically, pass a location",
                self.node(parent)?.name
            ))),
        }
    }

    /// Unassign a resource from its parent. Will-unassign hooks of the old
    /// ancestor chain may veto; afterwards the resource is a detached root
    /// with its location cleared.
    pub fn unassign(&mut self, child: NodeId) -> Result<(), LabwareError> {
        let parent = self.node(child)?.parent.ok_or_else(|| {
            LabwareError::InvalidArgument(format!(
                "resource '{}' has no parent",
                // child was just validated
                self.node(child).map(|n| n.name.clone()).unwrap_or_default()
            ))
        })?;
        self.unassign_child(parent, child)
    }

    /// Unassign a direct child of `parent`.
    pub fn unassign_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), LabwareError> {
        if self.node(child)?.parent != Some(parent) {
            return Err(LabwareError::InvalidArgument(format!(
                "resource '{}' is not a child of '{}'",
                self.node(child)?.name,
                self.node(parent)?.name
            )));
        }
        if let ResourceData::Stack { direction: StackDirection::Z } = self.node(parent)?.data {
            if self.node(parent)?.children.last() != Some(&child) {
                return Err(LabwareError::InvalidArgument(
                    "resource is not the top item in this z-growing stack".into(),
                ));
            }
        }

        let chain = self.ancestors_from(parent)?;
        for &ancestor in &chain {
            let hooks = self.node(ancestor)?.hooks.will_unassign.clone();
            for hook in hooks {
                hook(self, child)?;
            }
        }

        {
            let parent_node = self.node_mut(parent)?;
            parent_node.children.retain(|&c| c != child);
        }
        {
            let child_node = self.node_mut(child)?;
            child_node.parent = None;
            child_node.location = None;
        }

        for &ancestor in &chain {
            let hooks = self.node(ancestor)?.hooks.did_unassign.clone();
            for hook in hooks {
                hook(self, child);
            }
        }
        Ok(())
    }

    /// Check that no name in the candidate subtree collides with a name in
    /// the target subtree. Used by deck will-assign hooks.
    pub fn check_names_free(
        &self,
        target_root: NodeId,
        candidate: NodeId,
    ) -> Result<(), LabwareError> {
        let mut taken: HashSet<&str> = HashSet::new();
        taken.insert(&self.node(target_root)?.name);
        for id in self.descendants(target_root)? {
            taken.insert(&self.node(id)?.name);
        }
        for id in std::iter::once(candidate).chain(self.descendants(candidate)?) {
            let name = &self.node(id)?.name;
            if taken.contains(name.as_str()) {
                return Err(LabwareError::InvalidAssignment(format!(
                    "resource '{name}' already assigned"
                )));
            }
        }
        Ok(())
    }

    // ── Itemized resources ───────────────────────────────────────────────────

    /// Child of a gridded resource (plate, tip rack) by A1-style
    /// identifier.
    pub fn item(&self, id: NodeId, identifier: &str) -> Result<NodeId, LabwareError> {
        let grid = match self.node(id)?.data {
            ResourceData::Plate(grid) | ResourceData::TipRack(grid) => grid,
            _ => {
                return Err(LabwareError::InvalidArgument(format!(
                    "resource '{}' is not itemized",
                    self.node(id)?.name
                )))
            }
        };
        let index = grid.index_of(identifier)?;
        self.node(id)?
            .children
            .get(index)
            .copied()
            .ok_or_else(|| LabwareError::ResourceNotFound(identifier.to_string()))
    }

    /// Items of a whole column, top row first.
    pub fn column(&self, id: NodeId, column: usize) -> Result<Vec<NodeId>, LabwareError> {
        let grid = match self.node(id)?.data {
            ResourceData::Plate(grid) | ResourceData::TipRack(grid) => grid,
            _ => {
                return Err(LabwareError::InvalidArgument(format!(
                    "resource '{}' is not itemized",
                    self.node(id)?.name
                )))
            }
        };
        if column >= grid.num_cols as usize {
            return Err(LabwareError::InvalidArgument(format!(
                "column {column} outside grid with {} columns",
                grid.num_cols
            )));
        }
        let children = &self.node(id)?.children;
        let start = column * grid.num_rows as usize;
        Ok(children[start..start + grid.num_rows as usize].to_vec())
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn plain(tree: &mut ResourceTree, name: &str, size: f64) -> NodeId {
        tree.add(ResourceInit::new(name, size, size, size))
    }

    #[test]
    fn assign_sets_parent_and_location() {
        let mut tree = ResourceTree::new();
        let parent = plain(&mut tree, "parent", 100.0);
        let child = plain(&mut tree, "child", 10.0);
        tree.set_location(parent, Some(Coordinate::zero())).unwrap();
        tree.assign_child(parent, child, Some(Coordinate::new(5.0, 5.0, 0.0)), false)
            .unwrap();
        assert_eq!(tree.parent(child).unwrap(), Some(parent));
        assert_eq!(tree.children(parent).unwrap(), &[child]);
        assert_eq!(
            tree.location(child).unwrap(),
            Some(Coordinate::new(5.0, 5.0, 0.0))
        );
    }

    #[test]
    fn self_assignment_is_rejected() {
        let mut tree = ResourceTree::new();
        let node = plain(&mut tree, "node", 10.0);
        assert!(matches!(
            tree.assign_child(node, node, Some(Coordinate::zero()), false),
            Err(LabwareError::InvalidAssignment(_))
        ));
    }

    #[test]
    fn assignment_with_existing_parent_needs_reassign() {
        let mut tree = ResourceTree::new();
        let a = plain(&mut tree, "a", 100.0);
        let b = plain(&mut tree, "b", 100.0);
        let child = plain(&mut tree, "child", 10.0);
        tree.assign_child(a, child, Some(Coordinate::zero()), false)
            .unwrap();
        assert!(tree
            .assign_child(b, child, Some(Coordinate::zero()), false)
            .is_err());
        tree.assign_child(b, child, Some(Coordinate::zero()), true)
            .unwrap();
        assert_eq!(tree.parent(child).unwrap(), Some(b));
        assert!(tree.children(a).unwrap().is_empty());
    }

    #[test]
    fn unassign_clears_parent_and_location() {
        let mut tree = ResourceTree::new();
        let parent = plain(&mut tree, "parent", 100.0);
        let child = plain(&mut tree, "child", 10.0);
        tree.assign_child(parent, child, Some(Coordinate::zero()), false)
            .unwrap();
        tree.unassign(child).unwrap();
        assert_eq!(tree.parent(child).unwrap(), None);
        assert_eq!(tree.location(child).unwrap(), None);
        assert!(tree.children(parent).unwrap().is_empty());
    }

    #[test]
    fn hooks_fire_at_every_ancestor_for_grandchildren() {
        let mut tree = ResourceTree::new();
        let root = plain(&mut tree, "root", 100.0);
        let mid = plain(&mut tree, "mid", 50.0);
        let leaf = plain(&mut tree, "leaf", 10.0);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_hook = fired.clone();
        tree.register_did_assign(
            root,
            Arc::new(move |_, _| {
                fired_hook.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        tree.assign_child(root, mid, Some(Coordinate::zero()), false)
            .unwrap();
        tree.assign_child(mid, leaf, Some(Coordinate::zero()), false)
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_will_assign_leaves_tree_unchanged() {
        let mut tree = ResourceTree::new();
        let parent = plain(&mut tree, "parent", 100.0);
        let child = plain(&mut tree, "child", 10.0);
        tree.register_will_assign(
            parent,
            Arc::new(|_, _| Err(LabwareError::InvalidAssignment("vetoed".into()))),
        )
        .unwrap();
        assert!(tree
            .assign_child(parent, child, Some(Coordinate::zero()), false)
            .is_err());
        assert_eq!(tree.parent(child).unwrap(), None);
        assert!(tree.children(parent).unwrap().is_empty());
    }

    #[test]
    fn absolute_location_composes_rotations() {
        let mut tree = ResourceTree::new();
        let parent = tree.add(
            ResourceInit::new("parent", 100.0, 100.0, 10.0)
                .rotation(Rotation::new(0.0, 0.0, 90.0)),
        );
        tree.set_location(parent, Some(Coordinate::zero())).unwrap();
        let child = plain(&mut tree, "child", 10.0);
        tree.assign_child(parent, child, Some(Coordinate::new(10.0, 0.0, 0.0)), false)
            .unwrap();
        let abs = tree.absolute_origin(child).unwrap();
        // (10, 0, 0) rotated 90 degrees around z is (0, 10, 0).
        assert!((abs.x - 0.0).abs() < 1e-9);
        assert!((abs.y - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rotating_four_times_restores_absolute_size() {
        let mut tree = ResourceTree::new();
        let node = tree.add(ResourceInit::new("box", 12.0, 6.0, 3.0));
        let original = tree.absolute_size_x(node).unwrap();
        for _ in 0..4 {
            tree.rotate_z(node, 90.0).unwrap();
        }
        assert!((tree.absolute_size_x(node).unwrap() - original).abs() < 1e-6);
        assert_eq!(tree.rotation(node).unwrap().z, 0.0);
    }

    #[test]
    fn absolute_size_under_quarter_turn_swaps_axes() {
        let mut tree = ResourceTree::new();
        let node = tree.add(
            ResourceInit::new("box", 12.0, 6.0, 3.0).rotation(Rotation::new(0.0, 0.0, 90.0)),
        );
        assert!((tree.absolute_size_x(node).unwrap() - 6.0).abs() < 1e-9);
        assert!((tree.absolute_size_y(node).unwrap() - 12.0).abs() < 1e-9);
        assert!((tree.absolute_size_z(node).unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn stack_sizes_sum_along_axis() {
        let mut tree = ResourceTree::new();
        let stack = tree.add(
            ResourceInit::new("stack", 0.0, 0.0, 0.0).data(ResourceData::Stack {
                direction: StackDirection::Z,
            }),
        );
        let a = tree.add(ResourceInit::new("a", 1.0, 2.0, 10.0));
        let b = tree.add(ResourceInit::new("b", 1.0, 2.0, 10.0));
        tree.assign_child(stack, a, None, false).unwrap();
        tree.assign_child(stack, b, None, false).unwrap();
        assert_eq!(tree.size_z(stack).unwrap(), 20.0);
        assert_eq!(tree.size_x(stack).unwrap(), 1.0);
        // b sits on top of a
        assert_eq!(
            tree.location(b).unwrap(),
            Some(Coordinate::new(0.0, 0.0, 10.0))
        );
    }

    #[test]
    fn z_stack_only_releases_top() {
        let mut tree = ResourceTree::new();
        let stack = tree.add(
            ResourceInit::new("stack", 0.0, 0.0, 0.0).data(ResourceData::Stack {
                direction: StackDirection::Z,
            }),
        );
        let bottom = tree.add(ResourceInit::new("bottom", 1.0, 1.0, 10.0));
        let top = tree.add(ResourceInit::new("top", 1.0, 1.0, 10.0));
        tree.assign_child(stack, bottom, None, false).unwrap();
        tree.assign_child(stack, top, None, false).unwrap();
        assert!(tree.unassign(bottom).is_err());
        tree.unassign(top).unwrap();
        tree.unassign(bottom).unwrap();
        assert_eq!(tree.size_z(stack).unwrap(), 0.0);
    }

    #[test]
    fn stale_ids_are_detected() {
        let mut tree = ResourceTree::new();
        let node = plain(&mut tree, "gone", 1.0);
        tree.remove_subtree(node).unwrap();
        assert!(matches!(tree.name(node), Err(LabwareError::StaleNodeId)));
        // Slot reuse must not revive the old handle.
        let _other = plain(&mut tree, "other", 1.0);
        assert!(matches!(tree.name(node), Err(LabwareError::StaleNodeId)));
    }

    #[test]
    fn get_resource_searches_depth_first() {
        let mut tree = ResourceTree::new();
        let root = plain(&mut tree, "root", 100.0);
        let a = plain(&mut tree, "a", 10.0);
        let b = plain(&mut tree, "needle", 10.0);
        tree.assign_child(root, a, Some(Coordinate::zero()), false)
            .unwrap();
        tree.assign_child(a, b, Some(Coordinate::zero()), false)
            .unwrap();
        assert_eq!(tree.get_resource(root, "needle").unwrap(), b);
        assert!(tree.get_resource(root, "missing").is_err());
    }

    #[test]
    fn grid_identifier_math() {
        let grid = GridData {
            num_cols: 12,
            num_rows: 8,
        };
        assert_eq!(grid.index_of("A1").unwrap(), 0);
        assert_eq!(grid.index_of("H1").unwrap(), 7);
        assert_eq!(grid.index_of("A2").unwrap(), 8);
        assert_eq!(grid.index_of("C1").unwrap(), 2);
        assert!(grid.index_of("I1").is_err());
        assert!(grid.index_of("A13").is_err());
    }
}
