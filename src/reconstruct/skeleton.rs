//! Bone hierarchies: reference skeleton <-> [`SkeletonData`], and a
//! validated tree view over parent indices.

use tracing::debug;

use crate::error::{AssetResult, TableKind, corrupt_skeleton, dangling};
use crate::model::{BoneData, SkeletonData, Transform};
use crate::objects::skeleton::{BoneInfo, BonePose, ReferenceSkeleton};
use crate::package::names::NameTable;

/// Children lists and a parents-first order over a set of bones.
///
/// Parents may be declared after their children, so nothing here relies on
/// declaration order. Building the tree fails on parent indices outside the
/// bone list and on cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoneTree {
    pub roots: Vec<usize>,
    pub children: Vec<Vec<usize>>,
    /// Every bone, each after its parent.
    pub order: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    InProgress,
    Done,
}

impl BoneTree {
    pub fn build(parents: &[Option<usize>]) -> AssetResult<Self> {
        let len = parents.len();
        let mut roots = Vec::new();
        let mut children = vec![Vec::new(); len];
        for (bone, parent) in parents.iter().enumerate() {
            match parent {
                None => roots.push(bone),
                Some(p) if *p >= len => return Err(dangling(TableKind::Bone, *p as i64, len)),
                Some(p) => children[*p].push(bone),
            }
        }

        // Walk up from every bone; meeting a bone already on the current
        // path means the parent links loop.
        let mut state = vec![Visit::Unseen; len];
        for start in 0..len {
            let mut path = Vec::new();
            let mut current = Some(start);
            while let Some(bone) = current {
                match state[bone] {
                    Visit::Done => break,
                    Visit::InProgress => {
                        return Err(corrupt_skeleton(format!("bone {bone} is its own ancestor")));
                    }
                    Visit::Unseen => {
                        state[bone] = Visit::InProgress;
                        path.push(bone);
                        current = parents[bone];
                    }
                }
            }
            for bone in path {
                state[bone] = Visit::Done;
            }
        }

        let mut order = Vec::with_capacity(len);
        let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
        while let Some(bone) = stack.pop() {
            order.push(bone);
            stack.extend(children[bone].iter().rev());
        }
        if len > 0 && roots.is_empty() {
            return Err(corrupt_skeleton("no root bone"));
        }
        Ok(Self { roots, children, order })
    }

    pub fn from_skeleton(skeleton: &SkeletonData) -> AssetResult<Self> {
        let parents: Vec<Option<usize>> = skeleton.bones.iter().map(|b| b.parent).collect();
        Self::build(&parents)
    }

    /// Bone transforms in model space.
    pub fn world_transforms(&self, skeleton: &SkeletonData) -> Vec<Transform> {
        let mut world = vec![Transform::IDENTITY; skeleton.bones.len()];
        for &bone in &self.order {
            let data = &skeleton.bones[bone];
            world[bone] = match data.parent {
                Some(p) => world[p].compose(&data.local),
                None => data.local,
            };
        }
        world
    }

    /// `bone` followed by its ancestors up to the root.
    pub fn ancestors(&self, skeleton: &SkeletonData, bone: usize) -> Vec<usize> {
        let mut chain = vec![bone];
        let mut current = skeleton.bones.get(bone).and_then(|b| b.parent);
        while let Some(p) = current {
            chain.push(p);
            current = skeleton.bones[p].parent;
        }
        chain
    }
}

/// Semantic view of a reference skeleton. `retarget` holds one optional
/// mode per bone and may be shorter than the bone list.
pub fn skeleton_data(reference: &ReferenceSkeleton, retarget: &[Option<String>]) -> AssetResult<SkeletonData> {
    let len = reference.len();
    let bones = reference
        .bones
        .iter()
        .zip(&reference.poses)
        .enumerate()
        .map(|(i, (bone, pose))| {
            let parent = match bone.parent {
                p if p < 0 => None,
                p if p as usize >= len => return Err(dangling(TableKind::Bone, p as i64, len)),
                p => Some(p as usize),
            };
            Ok(BoneData {
                name: bone.name.to_string(),
                parent,
                local: Transform {
                    rotation: pose.rotation,
                    translation: pose.translation,
                    scale: pose.scale,
                },
                retarget: retarget.get(i).cloned().flatten(),
            })
        })
        .collect::<AssetResult<Vec<_>>>()?;
    let skeleton = SkeletonData { bones };
    BoneTree::from_skeleton(&skeleton)?;
    Ok(skeleton)
}

/// Replace the bones of `reference` with `skeleton`, interning new names.
pub fn apply_skeleton(reference: &mut ReferenceSkeleton, names: &mut NameTable, skeleton: &SkeletonData) -> AssetResult<()> {
    BoneTree::from_skeleton(skeleton)?;
    let bones = skeleton
        .bones
        .iter()
        .map(|b| BoneInfo {
            name: names.intern(&b.name),
            parent: b.parent.map_or(-1, |p| p as i32),
        })
        .collect();
    let poses = skeleton
        .bones
        .iter()
        .map(|b| BonePose {
            rotation: b.local.rotation,
            translation: b.local.translation,
            scale: b.local.scale,
        })
        .collect();
    reference.set_bones(bones, poses);
    debug!(bones = reference.len(), "replaced reference skeleton");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssetError;
    use crate::test_support::{name_table, sample_reference};

    #[test]
    fn test_out_of_order_parents() {
        // Bone 0 is a child of bone 2, which is declared later.
        let tree = BoneTree::build(&[Some(2), None, Some(1), Some(0)]).unwrap();
        assert_eq!(tree.roots, vec![1]);
        assert_eq!(tree.children[2], vec![0]);
        assert_eq!(tree.order, vec![1, 2, 0, 3]);
    }

    #[test]
    fn test_non_sequential_parent() {
        let mut names = name_table(&["None"]);
        let reference = sample_reference(&mut names, &[-1, 0, 0]);
        let skeleton = skeleton_data(&reference, &[]).unwrap();
        let tree = BoneTree::from_skeleton(&skeleton).unwrap();
        assert_eq!(tree.roots, vec![0]);
        assert_eq!(tree.children[0], vec![1, 2]);
        assert_eq!(skeleton.bones[2].name, "bone_2");
        assert_eq!(skeleton.bones[2].parent, Some(0));

        let world = tree.world_transforms(&skeleton);
        assert_eq!(world[2].translation, [2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_cycles_are_corruption() {
        for parents in [vec![Some(1), Some(0)], vec![None, Some(2), Some(3), Some(1)], vec![Some(0)]] {
            let err = BoneTree::build(&parents).unwrap_err();
            assert!(matches!(err.current_context(), AssetError::CorruptSkeleton { .. }), "{parents:?}");
        }
        let err = BoneTree::build(&[None, Some(5)]).unwrap_err();
        assert!(matches!(
            err.current_context(),
            AssetError::DanglingReference { table: TableKind::Bone, index: 5, .. }
        ));
    }

    #[test]
    fn test_apply_skeleton_interns_names() {
        let mut names = name_table(&["None"]);
        let mut reference = sample_reference(&mut names, &[-1, 0]);
        let mut skeleton = skeleton_data(&reference, &[Some("Animation".into())]).unwrap();
        assert_eq!(skeleton.bones[0].retarget.as_deref(), Some("Animation"));
        assert_eq!(skeleton.bones[1].retarget, None);

        skeleton.bones.push(BoneData {
            name: "hand_l".into(),
            parent: Some(1),
            local: Transform::IDENTITY,
            retarget: None,
        });
        apply_skeleton(&mut reference, &mut names, &skeleton).unwrap();
        assert_eq!(reference.len(), 3);
        assert_eq!(reference.find_bone("hand_l"), Some(2));
        assert_eq!(reference.name_to_index.len(), 3);
        assert!(names.find("hand_l").is_some());

        skeleton.bones[0].parent = Some(2);
        assert!(apply_skeleton(&mut reference, &mut names, &skeleton).is_err());
        assert_eq!(reference.len(), 3);
    }
}
