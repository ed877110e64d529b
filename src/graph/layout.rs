//! 空间布局：纯函数 place(level, parent, nexus, sibling_index)
//!
//! - L1（Nexus 的直接子节点）：以 Nexus 为中心的黄金角环，半径随序号缓慢增大，y 方向轻微起伏
//! - L2 / 更深层：沿「Nexus → 父节点」方向向外延伸，再在垂直平面内做一圈更小的黄金角螺旋，
//!   使子节点背离中心展开而不是堆在父节点上

use std::f64::consts::PI;

use serde::Deserialize;

use crate::graph::Vec3;

/// 黄金角 π(3−√5)
pub const GOLDEN_ANGLE: f64 = PI * (3.0 - 2.236_067_977_499_79);

/// 父节点所在层级决定子节点的基础半径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// 父节点是 Nexus
    L1,
    /// 父节点是 L1 节点
    L2,
    /// 更深
    Deep,
}

impl Level {
    /// depth = 父实体到 Nexus 的跳数（Nexus 为 0）
    pub fn from_parent_depth(depth: usize) -> Self {
        match depth {
            0 => Level::L1,
            1 => Level::L2,
            _ => Level::Deep,
        }
    }
}

/// [layout] 配置段
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// L1 基础半径
    pub r1: f64,
    /// L2 基础半径
    pub r2: f64,
    /// L3+ 基础半径
    pub r3: f64,
    /// 每多一个兄弟节点增加的半径
    pub radius_step: f64,
    /// L1 纵向起伏幅度
    pub wobble: f64,
    /// 深层节点在垂直平面内的螺旋半径
    pub spiral_radius: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            r1: 8.0,
            r2: 5.0,
            r3: 3.5,
            radius_step: 0.4,
            wobble: 1.0,
            spiral_radius: 1.5,
        }
    }
}

/// 计算子节点坐标。相同参数必然得到相同结果。
pub fn place(
    level: Level,
    parent: Vec3,
    nexus: Vec3,
    sibling_index: usize,
    cfg: &LayoutConfig,
) -> Vec3 {
    let i = sibling_index as f64;
    let angle = i * GOLDEN_ANGLE;

    let base = match level {
        Level::L1 => {
            let radius = cfg.r1 + i * cfg.radius_step;
            return parent.add(Vec3::new(
                radius * angle.cos(),
                (i * 0.5).sin() * cfg.wobble,
                radius * angle.sin(),
            ));
        }
        Level::L2 => cfg.r2,
        Level::Deep => cfg.r3,
    };

    let outward = parent
        .sub(nexus)
        .normalized()
        .unwrap_or(Vec3::new(1.0, 0.0, 0.0));
    let (u, v) = perpendicular_basis(outward);
    let radius = base + i * cfg.radius_step * 0.5;
    let spiral = u
        .scale(angle.cos() * cfg.spiral_radius)
        .add(v.scale(angle.sin() * cfg.spiral_radius));

    parent.add(outward.scale(radius)).add(spiral)
}

/// 与 dir 正交且彼此正交的两个单位向量
fn perpendicular_basis(dir: Vec3) -> (Vec3, Vec3) {
    let up = if dir.y.abs() > 0.99 {
        Vec3::new(1.0, 0.0, 0.0)
    } else {
        Vec3::new(0.0, 1.0, 0.0)
    };
    let u = dir
        .cross(up)
        .normalized()
        .unwrap_or(Vec3::new(0.0, 0.0, 1.0));
    let v = dir.cross(u);
    (u, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_golden_angle_value() {
        assert!((GOLDEN_ANGLE - 2.399_963_229_728_653).abs() < 1e-9);
    }

    #[test]
    fn test_place_is_deterministic() {
        let cfg = LayoutConfig::default();
        let parent = Vec3::new(3.0, 1.0, -2.0);
        for level in [Level::L1, Level::L2, Level::Deep] {
            for i in 0..10 {
                let a = place(level, parent, Vec3::ZERO, i, &cfg);
                let b = place(level, parent, Vec3::ZERO, i, &cfg);
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_l1_ring_radius_grows() {
        let cfg = LayoutConfig::default();
        let mut prev = 0.0;
        for i in 0..5 {
            let p = place(Level::L1, Vec3::ZERO, Vec3::ZERO, i, &cfg);
            let planar = (p.x * p.x + p.z * p.z).sqrt();
            assert!((planar - (cfg.r1 + i as f64 * cfg.radius_step)).abs() < 1e-9);
            assert!(planar > prev);
            assert!(p.y.abs() <= cfg.wobble + 1e-12);
            prev = planar;
        }
    }

    #[test]
    fn test_deeper_levels_move_outward() {
        let cfg = LayoutConfig::default();
        let nexus = Vec3::ZERO;
        let parent = Vec3::new(8.0, 0.0, 0.0);
        for i in 0..6 {
            let child = place(Level::L2, parent, nexus, i, &cfg);
            // 沿外向方向的投影超过父节点
            assert!(child.x > parent.x);
            assert!(child.distance(nexus) > parent.distance(nexus));
        }
    }

    #[test]
    fn test_deep_uses_smaller_radius() {
        let cfg = LayoutConfig::default();
        let parent = Vec3::new(0.0, 0.0, 10.0);
        let l2 = place(Level::L2, parent, Vec3::ZERO, 0, &cfg);
        let deep = place(Level::Deep, parent, Vec3::ZERO, 0, &cfg);
        assert!(deep.z - parent.z < l2.z - parent.z);
    }

    #[test]
    fn test_degenerate_direction_falls_back() {
        let cfg = LayoutConfig::default();
        let p = place(Level::L2, Vec3::ZERO, Vec3::ZERO, 0, &cfg);
        assert!(p.x.is_finite() && p.y.is_finite() && p.z.is_finite());
        assert!((p.x - cfg.r2).abs() < 1e-9);
    }

    #[test]
    fn test_basis_is_orthonormal() {
        for dir in [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.3, -0.4, 0.866).normalized().unwrap(),
        ] {
            let (u, v) = perpendicular_basis(dir);
            assert!(u.dot(dir).abs() < 1e-9);
            assert!(v.dot(dir).abs() < 1e-9);
            assert!(u.dot(v).abs() < 1e-9);
            assert!((u.length() - 1.0).abs() < 1e-9);
            assert!((v.length() - 1.0).abs() < 1e-9);
        }
    }
}
