//! Scene Extractor (C3) – walks a parsed glTF node tree, computes world
//! transforms, and collects waypoints and box colliders.
//!
//! Produces a read-only `SceneMap`, built once per room and handed to the
//! simulator. There's no physics engine underneath it — colliders exist
//! purely for line-of-sight tests.

use crate::error::GhostRunnerError;
use glam::{EulerRot, Mat4, Quat, Vec3};
use log::warn;
use serde_json::Value;
use std::collections::HashSet;

const SPAWBOT_PREFIX: &str = "spawbot-";
/// Below this determinant magnitude a transform is treated as non-invertible.
const INVERTIBILITY_EPS: f32 = 1e-8;

#[derive(Debug, Clone)]
pub struct Waypoint {
    pub name: String,
    pub position: Vec3,
    pub is_spawn_candidate: bool,
    pub is_named_spawbot: bool,
}

#[derive(Debug, Clone)]
pub struct BoxCollider {
    pub name: String,
    pub world_transform: Mat4,
    pub inverse_world_transform: Mat4,
}

#[derive(Debug, Clone, Default)]
pub struct SceneMap {
    pub all_waypoints: Vec<Waypoint>,
    pub spawn_points: Vec<Waypoint>,
    pub patrol_points: Vec<Waypoint>,
    pub colliders: Vec<BoxCollider>,
}

impl SceneMap {
    /// An empty map — used whenever scene fetch/parse fails, so the
    /// simulator degrades to wandering near the origin rather than erroring.
    pub fn empty() -> Self {
        Self::default()
    }
}

struct RawNode {
    name: Option<String>,
    matrix: Option<[f32; 16]>,
    translation: Option<[f32; 3]>,
    rotation: Option<[f32; 4]>,
    scale: Option<[f32; 3]>,
    children: Vec<usize>,
    components: Option<Value>,
}

fn parse_node(v: &Value) -> RawNode {
    let arr3 = |key: &str| -> Option<[f32; 3]> {
        v.get(key)?.as_array().map(|a| {
            let mut out = [0.0f32; 3];
            for (i, x) in a.iter().take(3).enumerate() {
                out[i] = x.as_f64().unwrap_or(0.0) as f32;
            }
            out
        })
    };
    let matrix = v.get("matrix").and_then(|m| m.as_array()).map(|a| {
        let mut out = [0.0f32; 16];
        for (i, x) in a.iter().take(16).enumerate() {
            out[i] = x.as_f64().unwrap_or(0.0) as f32;
        }
        out
    });
    let rotation = v.get("rotation").and_then(|m| m.as_array()).map(|a| {
        let mut out = [0.0f32, 0.0, 0.0, 1.0];
        for (i, x) in a.iter().take(4).enumerate() {
            out[i] = x.as_f64().unwrap_or(0.0) as f32;
        }
        out
    });
    let children = v
        .get("children")
        .and_then(|c| c.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_u64()).map(|x| x as usize).collect())
        .unwrap_or_default();

    let components = v
        .get("extensions")
        .and_then(|e| e.get("MOZ_hubs_components").or_else(|| e.get("HUBS_components")))
        .cloned();

    RawNode {
        name: v.get("name").and_then(|n| n.as_str()).map(str::to_string),
        matrix,
        translation: arr3("translation"),
        rotation,
        scale: arr3("scale"),
        children,
        components,
    }
}

fn local_transform(node: &RawNode) -> Mat4 {
    if let Some(m) = node.matrix {
        return Mat4::from_cols_array(&m);
    }
    let t = node.translation.unwrap_or([0.0, 0.0, 0.0]);
    let r = node.rotation.unwrap_or([0.0, 0.0, 0.0, 1.0]);
    let s = node.scale.unwrap_or([1.0, 1.0, 1.0]);
    Mat4::from_scale_rotation_translation(
        Vec3::new(s[0], s[1], s[2]),
        Quat::from_xyzw(r[0], r[1], r[2], r[3]),
        Vec3::new(t[0], t[1], t[2]),
    )
}

fn euler_deg_transform(position: Vec3, rotation_deg: Vec3, scale: Vec3) -> Mat4 {
    let rot = Quat::from_euler(
        EulerRot::XYZ,
        rotation_deg.x.to_radians(),
        rotation_deg.y.to_radians(),
        rotation_deg.z.to_radians(),
    );
    Mat4::from_scale_rotation_translation(scale, rot, position)
}

/// Extract a [`SceneMap`] from a parsed glTF document.
///
/// Any malformed or missing piece degrades gracefully toward an empty
/// collection rather than erroring — the caller is
/// expected to fall back to wandering near the origin.
pub fn extract_scene(gltf: &Value) -> SceneMap {
    let Some(nodes_json) = gltf.get("nodes").and_then(|n| n.as_array()) else {
        warn!("{}", GhostRunnerError::SceneEmpty);
        return SceneMap::empty();
    };
    let raw_nodes: Vec<RawNode> = nodes_json.iter().map(parse_node).collect();
    if raw_nodes.is_empty() {
        warn!("{}", GhostRunnerError::SceneEmpty);
        return SceneMap::empty();
    }

    let scene_index = gltf.get("scene").and_then(|s| s.as_u64()).unwrap_or(0) as usize;
    let roots: Vec<usize> = gltf
        .get("scenes")
        .and_then(|scenes| scenes.as_array())
        .and_then(|scenes| scenes.get(scene_index))
        .and_then(|scene| scene.get("nodes"))
        .and_then(|n| n.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_u64()).map(|x| x as usize).collect())
        .unwrap_or_default();

    let mut world_matrices: Vec<Option<Mat4>> = vec![None; raw_nodes.len()];
    let mut visited: HashSet<usize> = HashSet::new();

    for root in &roots {
        walk(*root, Mat4::IDENTITY, &raw_nodes, &mut visited, &mut world_matrices);
    }
    // Nodes unreachable from the chosen scene's roots still get a world
    // matrix, rooted at identity.
    for idx in 0..raw_nodes.len() {
        if !visited.contains(&idx) {
            walk(idx, Mat4::IDENTITY, &raw_nodes, &mut visited, &mut world_matrices);
        }
    }

    let mut all_waypoints = Vec::new();
    let mut colliders = Vec::new();

    for (idx, node) in raw_nodes.iter().enumerate() {
        let Some(world) = world_matrices[idx] else {
            continue;
        };
        let Some(components) = &node.components else {
            continue;
        };

        let trimmed_name = node.name.as_deref().unwrap_or("").trim().to_string();
        let name = if trimmed_name.is_empty() {
            format!("node-{}", idx)
        } else {
            trimmed_name
        };

        let waypoint_comp = components.get("waypoint");
        let spawn_point_comp = components
            .get("spawn-point")
            .or_else(|| components.get("spawn_point"));

        if waypoint_comp.is_some() || spawn_point_comp.is_some() {
            let can_be_spawn = waypoint_comp
                .and_then(|w| w.get("canBeSpawnPoint"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let is_spawn_candidate = can_be_spawn || spawn_point_comp.is_some();
            let is_named_spawbot = name.to_lowercase().starts_with(SPAWBOT_PREFIX);
            let position = world.transform_point3(Vec3::ZERO);

            all_waypoints.push(Waypoint {
                name: name.clone(),
                position,
                is_spawn_candidate,
                is_named_spawbot,
            });
        }

        // Not `else if` — a node may carry both a waypoint/spawn-point
        // component and a box-collider component; both are independent
        // per spec and neither suppresses the other.
        if let Some(box_collider) = components.get("box-collider") {
            let position = read_vec3(box_collider.get("position"), Vec3::ZERO);
            let rotation_deg = read_vec3(box_collider.get("rotation"), Vec3::ZERO);
            let scale = read_vec3(box_collider.get("scale"), Vec3::ONE);
            let local = euler_deg_transform(position, rotation_deg, scale);
            let combined = world * local;

            if combined.determinant().abs() < INVERTIBILITY_EPS {
                continue;
            }
            colliders.push(BoxCollider {
                name,
                world_transform: combined,
                inverse_world_transform: combined.inverse(),
            });
        }
    }

    if all_waypoints.is_empty() && colliders.is_empty() {
        warn!("{}", GhostRunnerError::SceneEmpty);
        return SceneMap::empty();
    }

    let named_spawbots: Vec<Waypoint> = all_waypoints
        .iter()
        .filter(|w| w.is_named_spawbot)
        .cloned()
        .collect();
    let spawn_candidates: Vec<Waypoint> = all_waypoints
        .iter()
        .filter(|w| w.is_spawn_candidate)
        .cloned()
        .collect();

    let spawn_points = if !named_spawbots.is_empty() {
        named_spawbots.clone()
    } else if !spawn_candidates.is_empty() {
        spawn_candidates.clone()
    } else {
        all_waypoints.clone()
    };

    let patrol_points = if named_spawbots.len() >= 2 {
        named_spawbots
    } else if all_waypoints.len() >= 2 {
        all_waypoints.clone()
    } else if spawn_candidates.len() >= 2 {
        spawn_candidates
    } else {
        Vec::new()
    };

    SceneMap {
        all_waypoints,
        spawn_points,
        patrol_points,
        colliders,
    }
}

fn walk(
    idx: usize,
    parent_world: Mat4,
    nodes: &[RawNode],
    visited: &mut HashSet<usize>,
    world_matrices: &mut [Option<Mat4>],
) {
    if !visited.insert(idx) {
        return;
    }
    let Some(node) = nodes.get(idx) else {
        return;
    };
    let world = parent_world * local_transform(node);
    world_matrices[idx] = Some(world);
    for &child in &node.children {
        walk(child, world, nodes, visited, world_matrices);
    }
}

fn read_vec3(v: Option<&Value>, default: Vec3) -> Vec3 {
    let Some(v) = v else { return default };
    let get = |key: &str, fallback: f32| -> f32 {
        v.get(key).and_then(|x| x.as_f64()).map(|x| x as f32).unwrap_or(fallback)
    };
    Vec3::new(get("x", default.x), get("y", default.y), get("z", default.z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gltf_with_waypoint() -> Value {
        json!({
            "scene": 0,
            "scenes": [{"nodes": [0]}],
            "nodes": [
                {
                    "name": "SpawBot-North",
                    "translation": [1.0, 0.0, 2.0],
                    "extensions": {
                        "MOZ_hubs_components": {
                            "spawn-point": {}
                        }
                    }
                }
            ]
        })
    }

    #[test]
    fn extracts_named_spawbot_as_spawn_candidate() {
        let scene = extract_scene(&gltf_with_waypoint());
        assert_eq!(scene.all_waypoints.len(), 1);
        let wp = &scene.all_waypoints[0];
        assert!(wp.is_spawn_candidate);
        assert!(wp.is_named_spawbot);
        assert_eq!(wp.name, "SpawBot-North");
        assert!((wp.position.x - 1.0).abs() < 1e-5);
        assert!((wp.position.z - 2.0).abs() < 1e-5);
    }

    #[test]
    fn empty_name_is_synthesized_from_index() {
        let gltf = json!({
            "scene": 0,
            "scenes": [{"nodes": [0]}],
            "nodes": [
                {
                    "name": "   ",
                    "extensions": {"MOZ_hubs_components": {"waypoint": {"canBeSpawnPoint": true}}}
                }
            ]
        });
        let scene = extract_scene(&gltf);
        assert_eq!(scene.all_waypoints[0].name, "node-0");
    }

    #[test]
    fn unreachable_node_still_gets_world_matrix() {
        // Node 1 is never listed as a scene root or as a child, but should
        // still be walked (rooted at identity) and extracted.
        let gltf = json!({
            "scene": 0,
            "scenes": [{"nodes": [0]}],
            "nodes": [
                {"name": "Root"},
                {
                    "name": "Orphan",
                    "extensions": {"MOZ_hubs_components": {"waypoint": {}}}
                }
            ]
        });
        let scene = extract_scene(&gltf);
        assert_eq!(scene.all_waypoints.len(), 1);
        assert_eq!(scene.all_waypoints[0].name, "Orphan");
    }

    #[test]
    fn non_invertible_collider_is_dropped() {
        let gltf = json!({
            "scene": 0,
            "scenes": [{"nodes": [0]}],
            "nodes": [
                {
                    "name": "Flat",
                    "scale": [0.0, 1.0, 1.0],
                    "extensions": {
                        "MOZ_hubs_components": {"box-collider": {}}
                    }
                }
            ]
        });
        let scene = extract_scene(&gltf);
        assert!(scene.colliders.is_empty());
    }

    #[test]
    fn node_with_both_waypoint_and_box_collider_yields_both() {
        let gltf = json!({
            "scene": 0,
            "scenes": [{"nodes": [0]}],
            "nodes": [
                {
                    "name": "spawbot-dual",
                    "extensions": {
                        "MOZ_hubs_components": {
                            "spawn-point": {},
                            "box-collider": {}
                        }
                    }
                }
            ]
        });
        let scene = extract_scene(&gltf);
        assert_eq!(scene.all_waypoints.len(), 1);
        assert_eq!(scene.colliders.len(), 1);
        assert_eq!(scene.all_waypoints[0].name, scene.colliders[0].name);
    }

    #[test]
    fn spawn_points_fall_back_to_all_waypoints_when_no_candidates() {
        let gltf = json!({
            "scene": 0,
            "scenes": [{"nodes": [0, 1]}],
            "nodes": [
                {"name": "wp-a", "extensions": {"MOZ_hubs_components": {"waypoint": {}}}},
                {"name": "wp-b", "extensions": {"MOZ_hubs_components": {"waypoint": {}}}}
            ]
        });
        let scene = extract_scene(&gltf);
        assert_eq!(scene.spawn_points.len(), 2);
        assert_eq!(scene.patrol_points.len(), 2);
    }
}
