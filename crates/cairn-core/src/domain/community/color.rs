//! Color assignment for the community forest
//!
//! Each root gets its own hue; descendants keep the hue and get darker with
//! depth and sibling position.

use std::collections::HashMap;

use super::entity::Community;

/// Neutral gray for communities that end up uncolored
pub const FALLBACK_COLOR: &str = "#9ca3af";

const SATURATION: f64 = 65.0;
const ROOT_LIGHTNESS: f64 = 50.0;
const LIGHTNESS_STEP: f64 = 8.0;
const MIN_LIGHTNESS: f64 = 25.0;
const MAX_LIGHTNESS: f64 = 80.0;

/// Color every community in place
///
/// Roots are the communities without a parent, taken in slice order.
pub fn assign_colors(communities: &mut [Community]) {
    let index: HashMap<String, usize> = communities
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.clone(), i))
        .collect();
    let roots: Vec<usize> = communities
        .iter()
        .enumerate()
        .filter(|(_, c)| c.parent_community_id.is_none())
        .map(|(i, _)| i)
        .collect();

    let mut colors: Vec<Option<String>> = vec![None; communities.len()];
    let root_count = roots.len() as f64;

    for (i, &root) in roots.iter().enumerate() {
        let hue = i as f64 * 360.0 / root_count;
        let mut stack = vec![(root, ROOT_LIGHTNESS)];

        while let Some((position, lightness)) = stack.pop() {
            // a malformed parent chain must not repaint
            if colors[position].is_some() {
                continue;
            }
            colors[position] = Some(hsl_to_hex(hue, SATURATION, lightness));

            for (sibling, child_id) in communities[position].child_community_ids.iter().enumerate() {
                if let Some(&child) = index.get(child_id) {
                    let child_lightness = (lightness - LIGHTNESS_STEP * (sibling as f64 + 1.0))
                        .clamp(MIN_LIGHTNESS, MAX_LIGHTNESS);
                    stack.push((child, child_lightness));
                }
            }
        }
    }

    for (community, color) in communities.iter_mut().zip(colors) {
        community.color = color.unwrap_or_else(|| FALLBACK_COLOR.to_string());
    }
}

/// `#rrggbb` for a hue in degrees and saturation/lightness in percent
pub fn hsl_to_hex(hue: f64, saturation: f64, lightness: f64) -> String {
    let h = hue.rem_euclid(360.0) / 60.0;
    let s = (saturation / 100.0).clamp(0.0, 1.0);
    let l = (lightness / 100.0).clamp(0.0, 1.0);

    let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = l - chroma / 2.0;
    let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;

    format!("#{:02x}{:02x}{:02x}", channel(r), channel(g), channel(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community(level: u32) -> Community {
        Community::new(level, vec![format!("e{level}")], "louvain")
    }

    #[test]
    fn test_hsl_to_hex() {
        assert_eq!(hsl_to_hex(0.0, 100.0, 50.0), "#ff0000");
        assert_eq!(hsl_to_hex(120.0, 100.0, 50.0), "#00ff00");
        assert_eq!(hsl_to_hex(240.0, 100.0, 50.0), "#0000ff");
        assert_eq!(hsl_to_hex(360.0, 100.0, 50.0), "#ff0000");
        assert_eq!(hsl_to_hex(0.0, 0.0, 100.0), "#ffffff");
        assert_eq!(hsl_to_hex(0.0, 0.0, 0.0), "#000000");
    }

    #[test]
    fn test_roots_get_evenly_spaced_hues() {
        let mut communities = vec![community(0), community(0), community(0)];
        assign_colors(&mut communities);

        assert_eq!(communities[0].color, hsl_to_hex(0.0, 65.0, 50.0));
        assert_eq!(communities[1].color, hsl_to_hex(120.0, 65.0, 50.0));
        assert_eq!(communities[2].color, hsl_to_hex(240.0, 65.0, 50.0));
    }

    #[test]
    fn test_children_inherit_hue_and_darken() {
        let mut root = community(1);
        let mut first = community(0);
        let mut second = community(0);
        first.parent_community_id = Some(root.id.clone());
        second.parent_community_id = Some(root.id.clone());
        root.child_community_ids = vec![first.id.clone(), second.id.clone()];

        let mut communities = vec![first, second, root];
        assign_colors(&mut communities);

        assert_eq!(communities[2].color, hsl_to_hex(0.0, 65.0, 50.0));
        assert_eq!(communities[0].color, hsl_to_hex(0.0, 65.0, 42.0));
        assert_eq!(communities[1].color, hsl_to_hex(0.0, 65.0, 34.0));
    }

    #[test]
    fn test_lightness_is_clamped() {
        let mut root = community(1);
        let mut children: Vec<Community> = (0..6).map(|_| community(0)).collect();
        for child in &mut children {
            child.parent_community_id = Some(root.id.clone());
        }
        root.child_community_ids = children.iter().map(|c| c.id.clone()).collect();

        children.push(root);
        assign_colors(&mut children);
        assert_eq!(children[5].color, hsl_to_hex(0.0, 65.0, 25.0));
    }

    #[test]
    fn test_unreachable_community_gets_fallback() {
        let mut orphaned = community(0);
        orphaned.parent_community_id = Some("missing".to_string());
        let mut communities = vec![community(0), orphaned];
        assign_colors(&mut communities);

        assert_eq!(communities[0].color, hsl_to_hex(0.0, 65.0, 50.0));
        assert_eq!(communities[1].color, FALLBACK_COLOR);
    }
}
