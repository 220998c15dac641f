//! JSON layout and state serialization.
//!
//! A layout serializes structure only: names, types, sizes, locations,
//! rotations, categories, child order. Mutable state (tips present, liquid
//! layers) serializes separately as a `{name: state}` map, so a saved deck
//! layout can be paired with any number of state snapshots.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::coordinate::Coordinate;
use crate::errors::LabwareError;
use crate::rotation::Rotation;
use crate::tip::TipSpotState;
use crate::tree::{GridData, NodeId, ResourceData, ResourceInit, ResourceTree, StackDirection};
use crate::well::WellState;

// ── Layout ────────────────────────────────────────────────────────────────────

/// Serialize a subtree into the JSON layout contract.
pub fn serialize_subtree(tree: &ResourceTree, id: NodeId) -> Result<Value, LabwareError> {
    let location = match tree.location(id)? {
        Some(c) => json!({ "type": "Coordinate", "x": c.x, "y": c.y, "z": c.z }),
        None => Value::Null,
    };
    let rotation = tree.rotation(id)?;
    let parent_name = match tree.parent(id)? {
        Some(parent) => Value::String(tree.name(parent)?.to_string()),
        None => Value::Null,
    };

    let mut out = Map::new();
    out.insert("name".into(), json!(tree.name(id)?));
    out.insert("type".into(), json!(tree.data(id)?.type_name()));
    out.insert("size_x".into(), json!(tree.size_x(id)?));
    out.insert("size_y".into(), json!(tree.size_y(id)?));
    out.insert("size_z".into(), json!(tree.size_z(id)?));
    out.insert("location".into(), location);
    out.insert(
        "rotation".into(),
        json!({ "type": "Rotation", "x": rotation.x, "y": rotation.y, "z": rotation.z }),
    );
    out.insert("category".into(), json!(tree.category(id)?));
    out.insert("model".into(), json!(tree.model(id)?));
    out.insert("parent_name".into(), parent_name);

    match tree.data(id)? {
        ResourceData::TipSpot(state) => {
            let tip = serde_json::to_value(&state.tip)
                .map_err(|e| LabwareError::Deserialize(e.to_string()))?;
            out.insert("tip".into(), tip);
        }
        ResourceData::Well(well) => {
            out.insert("material_z_thickness".into(), json!(well.material_z_thickness));
            out.insert("max_volume".into(), json!(well.max_volume));
        }
        ResourceData::Plate(grid) | ResourceData::TipRack(grid) => {
            out.insert("num_cols".into(), json!(grid.num_cols));
            out.insert("num_rows".into(), json!(grid.num_rows));
        }
        ResourceData::Holder { pedestal_size_z } => {
            out.insert("pedestal_size_z".into(), json!(pedestal_size_z));
        }
        ResourceData::Stack { direction } => {
            let dir = match direction {
                StackDirection::X => "x",
                StackDirection::Y => "y",
                StackDirection::Z => "z",
            };
            out.insert("direction".into(), json!(dir));
        }
        ResourceData::Generic
        | ResourceData::Deck
        | ResourceData::Trash
        | ResourceData::Carrier => {}
    }

    let mut children = Vec::new();
    for &child in tree.children(id)? {
        children.push(serialize_subtree(tree, child)?);
    }
    out.insert("children".into(), Value::Array(children));
    Ok(Value::Object(out))
}

fn get_f64(obj: &Map<String, Value>, key: &str) -> Result<f64, LabwareError> {
    obj.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| LabwareError::Deserialize(format!("missing numeric field '{key}'")))
}

fn get_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a str, LabwareError> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| LabwareError::Deserialize(format!("missing string field '{key}'")))
}

fn parse_coordinate(value: &Value) -> Result<Coordinate, LabwareError> {
    let obj = value
        .as_object()
        .ok_or_else(|| LabwareError::Deserialize("coordinate is not an object".into()))?;
    Ok(Coordinate::new(
        get_f64(obj, "x")?,
        get_f64(obj, "y")?,
        get_f64(obj, "z")?,
    ))
}

fn parse_data(type_name: &str, obj: &Map<String, Value>) -> Result<ResourceData, LabwareError> {
    Ok(match type_name {
        "Resource" => ResourceData::Generic,
        "Deck" | "StarDeck" => ResourceData::Deck,
        "Trash" => ResourceData::Trash,
        "TipSpot" => {
            let tip_value = obj
                .get("tip")
                .ok_or_else(|| LabwareError::Deserialize("tip spot without tip recipe".into()))?;
            let tip = serde_json::from_value(tip_value.clone())
                .map_err(|e| LabwareError::Deserialize(e.to_string()))?;
            ResourceData::TipSpot(TipSpotState::new(tip, false))
        }
        "TipRack" | "Plate" => {
            let grid = GridData {
                num_cols: get_f64(obj, "num_cols")? as u8,
                num_rows: get_f64(obj, "num_rows")? as u8,
            };
            if type_name == "Plate" {
                ResourceData::Plate(grid)
            } else {
                ResourceData::TipRack(grid)
            }
        }
        "Well" => ResourceData::Well(WellState::new(
            get_f64(obj, "material_z_thickness")?,
            get_f64(obj, "max_volume")?,
        )),
        "Carrier" => ResourceData::Carrier,
        "ResourceHolder" => ResourceData::Holder {
            pedestal_size_z: get_f64(obj, "pedestal_size_z")?,
        },
        "ResourceStack" => ResourceData::Stack {
            direction: match get_str(obj, "direction")? {
                "x" => StackDirection::X,
                "y" => StackDirection::Y,
                "z" => StackDirection::Z,
                other => {
                    return Err(LabwareError::Deserialize(format!(
                        "unknown stack direction '{other}'"
                    )))
                }
            },
        },
        other => {
            return Err(LabwareError::Deserialize(format!(
                "unknown resource type '{other}'"
            )))
        }
    })
}

/// Rebuild a subtree from its serialized form. The new subtree is a
/// detached root in `tree`; children are assigned with their recorded
/// locations, which also restores parent links.
pub fn deserialize_subtree(tree: &mut ResourceTree, value: &Value) -> Result<NodeId, LabwareError> {
    let obj = value
        .as_object()
        .ok_or_else(|| LabwareError::Deserialize("resource is not an object".into()))?;

    let type_name = get_str(obj, "type")?;
    let rotation = match obj.get("rotation") {
        Some(Value::Object(r)) => {
            Rotation::new(get_f64(r, "x")?, get_f64(r, "y")?, get_f64(r, "z")?)
        }
        _ => Rotation::identity(),
    };

    let mut init = ResourceInit::new(
        get_str(obj, "name")?,
        get_f64(obj, "size_x")?,
        get_f64(obj, "size_y")?,
        get_f64(obj, "size_z")?,
    )
    .rotation(rotation)
    .data(parse_data(type_name, obj)?);
    if let Some(category) = obj.get("category").and_then(Value::as_str) {
        init = init.category(category);
    }
    if let Some(model) = obj.get("model").and_then(Value::as_str) {
        init = init.model(model);
    }

    // Stacks compute their own size from children.
    let id = tree.add(init);

    if let Some(location) = obj.get("location").filter(|v| !v.is_null()) {
        tree.set_location(id, Some(parse_coordinate(location)?))?;
    }

    if let Some(children) = obj.get("children").and_then(Value::as_array) {
        for child_value in children {
            let child = deserialize_subtree(tree, child_value)?;
            let location = child_value
                .get("location")
                .filter(|v| !v.is_null())
                .map(parse_coordinate)
                .transpose()?;
            // assign_child re-applies the location; stacks and holders
            // recompute defaults when none was recorded.
            tree.assign_child(id, child, location, false)?;
        }
    }
    Ok(id)
}

/// Save a subtree layout to a JSON file.
pub fn save_to_file(
    tree: &ResourceTree,
    id: NodeId,
    path: impl AsRef<Path>,
) -> Result<(), LabwareError> {
    let value = serialize_subtree(tree, id)?;
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| LabwareError::Deserialize(e.to_string()))?;
    fs::write(path, text)?;
    Ok(())
}

/// Load a layout file into the tree as a detached root.
pub fn load_from_file(
    tree: &mut ResourceTree,
    path: impl AsRef<Path>,
) -> Result<NodeId, LabwareError> {
    let text = fs::read_to_string(path)?;
    let value: Value =
        serde_json::from_str(&text).map_err(|e| LabwareError::Deserialize(e.to_string()))?;
    deserialize_subtree(tree, &value)
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Serialize the mutable state of a subtree as `{name: state}`. Resources
/// without state are omitted.
pub fn serialize_all_state(tree: &ResourceTree, root: NodeId) -> Result<Value, LabwareError> {
    let mut out = Map::new();
    for id in std::iter::once(root).chain(tree.descendants(root)?) {
        let state = match tree.data(id)? {
            ResourceData::TipSpot(spot) => Some(json!({ "has_tip": spot.has_tip })),
            ResourceData::Well(well) => {
                let contents = serde_json::to_value(&well.contents)
                    .map_err(|e| LabwareError::Deserialize(e.to_string()))?;
                Some(json!({ "contents": contents }))
            }
            _ => None,
        };
        if let Some(state) = state {
            out.insert(tree.name(id)?.to_string(), state);
        }
    }
    Ok(Value::Object(out))
}

/// Apply a state map produced by [`serialize_all_state`]. Names without a
/// matching resource are ignored so partial snapshots load cleanly.
pub fn load_all_state(
    tree: &mut ResourceTree,
    root: NodeId,
    state: &Value,
) -> Result<(), LabwareError> {
    let map = state
        .as_object()
        .ok_or_else(|| LabwareError::Deserialize("state is not an object".into()))?;
    for id in std::iter::once(root).chain(tree.descendants(root)?) {
        let name = tree.name(id)?.to_string();
        let Some(entry) = map.get(&name) else {
            continue;
        };
        match tree.data_mut(id)? {
            ResourceData::TipSpot(spot) => {
                if let Some(has_tip) = entry.get("has_tip").and_then(Value::as_bool) {
                    spot.has_tip = has_tip;
                }
            }
            ResourceData::Well(well) => {
                if let Some(contents) = entry.get("contents") {
                    well.contents = serde_json::from_value(contents.clone())
                        .map_err(|e| LabwareError::Deserialize(e.to_string()))?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Save the state snapshot of a subtree to a JSON file.
pub fn save_state_to_file(
    tree: &ResourceTree,
    root: NodeId,
    path: impl AsRef<Path>,
) -> Result<(), LabwareError> {
    let state = serialize_all_state(tree, root)?;
    let text = serde_json::to_string_pretty(&state)
        .map_err(|e| LabwareError::Deserialize(e.to_string()))?;
    fs::write(path, text)?;
    Ok(())
}

/// Load a state snapshot from a JSON file into a subtree.
pub fn load_state_from_file(
    tree: &mut ResourceTree,
    root: NodeId,
    path: impl AsRef<Path>,
) -> Result<(), LabwareError> {
    let text = fs::read_to_string(path)?;
    let state: Value =
        serde_json::from_str(&text).map_err(|e| LabwareError::Deserialize(e.to_string()))?;
    load_all_state(tree, root, &state)
}

/// Deep-copy a subtree, structure and state, as a new detached root.
pub fn copy_subtree(tree: &mut ResourceTree, id: NodeId) -> Result<NodeId, LabwareError> {
    let layout = serialize_subtree(tree, id)?;
    let state = serialize_all_state(tree, id)?;
    let copy = deserialize_subtree(tree, &layout)?;
    load_all_state(tree, copy, &state)?;
    Ok(copy)
}

/// A deep copy rotated counter-clockwise around z, for placing the same
/// labware in another orientation.
pub fn rotated_copy(
    tree: &mut ResourceTree,
    id: NodeId,
    degrees: f64,
) -> Result<NodeId, LabwareError> {
    let copy = copy_subtree(tree, id)?;
    tree.rotate_z(copy, degrees)?;
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liquid::Liquid;
    use crate::tip::Tip;

    fn sample_tree() -> (ResourceTree, NodeId) {
        let mut tree = ResourceTree::new();
        let root = tree.add(
            ResourceInit::new("root", 100.0, 100.0, 50.0).category("carrier"),
        );
        tree.set_location(root, Some(Coordinate::new(10.0, 20.0, 30.0)))
            .unwrap();
        let spot = tree.add(
            ResourceInit::new("spot", 9.0, 9.0, 0.0)
                .category("tip_spot")
                .data(ResourceData::TipSpot(TipSpotState::new(
                    Tip::standard_volume_with_filter(),
                    true,
                ))),
        );
        let well = tree.add(
            ResourceInit::new("well", 6.35, 6.35, 10.0)
                .category("well")
                .data(ResourceData::Well(WellState::new(1.0, 400.0))),
        );
        tree.assign_child(root, spot, Some(Coordinate::new(1.0, 2.0, 3.0)), false)
            .unwrap();
        tree.assign_child(root, well, Some(Coordinate::new(4.0, 5.0, 6.0)), false)
            .unwrap();
        (tree, root)
    }

    #[test]
    fn layout_round_trip_preserves_structure() {
        let (mut tree, root) = sample_tree();
        let value = serialize_subtree(&tree, root).unwrap();
        let rebuilt = deserialize_subtree(&mut tree, &value).unwrap();

        assert_eq!(tree.name(rebuilt).unwrap(), "root");
        assert_eq!(tree.children(rebuilt).unwrap().len(), 2);
        let spot = tree.get_resource(rebuilt, "spot").unwrap();
        assert_eq!(
            tree.location(spot).unwrap(),
            Some(Coordinate::new(1.0, 2.0, 3.0))
        );
        assert_eq!(tree.parent(spot).unwrap(), Some(rebuilt));
        assert_eq!(tree.category(spot).unwrap(), Some("tip_spot"));
        // Child order survives.
        let names: Vec<_> = tree
            .children(rebuilt)
            .unwrap()
            .iter()
            .map(|&c| tree.name(c).unwrap().to_string())
            .collect();
        assert_eq!(names, ["spot", "well"]);
    }

    #[test]
    fn parent_name_and_nulls_in_layout() {
        let (tree, root) = sample_tree();
        let value = serialize_subtree(&tree, root).unwrap();
        assert_eq!(value["parent_name"], Value::Null);
        assert_eq!(value["children"][0]["parent_name"], json!("root"));
        assert_eq!(value["rotation"]["type"], json!("Rotation"));
        assert_eq!(value["model"], Value::Null);
    }

    #[test]
    fn state_round_trip() {
        let (mut tree, root) = sample_tree();
        let well = tree.get_resource(root, "well").unwrap();
        if let ResourceData::Well(state) = tree.data_mut(well).unwrap() {
            state.add_liquid(Liquid::Water, 123.0).unwrap();
        }

        let state = serialize_all_state(&tree, root).unwrap();
        assert_eq!(state["spot"]["has_tip"], json!(true));

        let copy = copy_subtree(&mut tree, root).unwrap();
        let well_copy = tree.get_resource(copy, "well").unwrap();
        match tree.data(well_copy).unwrap() {
            ResourceData::Well(w) => assert_eq!(w.total_volume(), 123.0),
            _ => panic!("expected a well"),
        }
    }

    #[test]
    fn file_round_trip() {
        let (tree, root) = sample_tree();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        save_to_file(&tree, root, &path).unwrap();

        let mut fresh = ResourceTree::new();
        let loaded = load_from_file(&mut fresh, &path).unwrap();
        assert_eq!(fresh.name(loaded).unwrap(), "root");
        assert!(fresh.get_resource(loaded, "well").is_ok());
    }
}
