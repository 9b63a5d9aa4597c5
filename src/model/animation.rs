//! Keyframe animation of scene nodes.
//!
//! Only node transforms are animated (no skinning or morph targets). Channels that
//! drive a node owned by a physics body are ignored for translation and rotation,
//! since the body→node sync writes those every tick. A node held by the editor is
//! not sampled at all while it is held.

use glam::{Quat, Vec3};
use std::collections::BTreeMap;

use super::scene::{NodeId, SceneGraph};

#[derive(Debug, Clone)]
pub enum Keyframes {
    Translation(Vec<Vec3>),
    Rotation(Vec<Quat>),
    Scale(Vec<Vec3>),
}

impl Keyframes {
    fn len(&self) -> usize {
        match self {
            Keyframes::Translation(v) | Keyframes::Scale(v) => v.len(),
            Keyframes::Rotation(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub target: NodeId,
    pub times: Vec<f32>,
    pub values: Keyframes,
}

impl Track {
    /// Index of the keyframe at or before `t` and the blend factor toward the next one
    fn locate(&self, t: f32) -> (usize, usize, f32) {
        let last = self.times.len().min(self.values.len()).saturating_sub(1);
        if last == 0 || t <= self.times[0] {
            return (0, 0, 0.0);
        }
        if t >= self.times[last] {
            return (last, last, 0.0);
        }
        let next = self.times.partition_point(|k| *k <= t).min(last);
        let prev = next - 1;
        let span = self.times[next] - self.times[prev];
        let f = if span > 0.0 { (t - self.times[prev]) / span } else { 0.0 };
        (prev, next, f)
    }

    fn apply(&self, t: f32, scene: &mut SceneGraph) {
        if self.values.len() == 0 {
            return;
        }
        let (a, b, f) = self.locate(t);
        let Some(node) = scene.get_mut(self.target) else {
            return;
        };
        let physics_owned = node.body.is_some();
        match &self.values {
            Keyframes::Translation(v) if !physics_owned => {
                node.transform.translation = v[a].lerp(v[b], f);
            }
            Keyframes::Rotation(v) if !physics_owned => {
                node.transform.rotation = v[a].slerp(v[b], f).normalize();
            }
            Keyframes::Scale(v) => {
                node.transform.scale = v[a].lerp(v[b], f);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    pub tracks: Vec<Track>,
    pub duration: f32,
    time: f32,
    playing: bool,
    looping: bool,
}

impl AnimationClip {
    pub fn new(name: &str, tracks: Vec<Track>) -> Self {
        let duration = tracks
            .iter()
            .filter_map(|t| t.times.last().copied())
            .fold(0.0f32, f32::max);
        Self {
            name: name.to_string(),
            tracks,
            duration,
            time: 0.0,
            playing: false,
            looping: false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn play(&mut self, looping: bool) {
        self.time = 0.0;
        self.looping = looping;
        self.playing = true;
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    /// Rewrite every track target through `map`. Tracks mapped to `None` are dropped.
    pub fn retarget(&mut self, map: impl Fn(NodeId) -> Option<NodeId>) {
        self.tracks.retain_mut(|track| match map(track.target) {
            Some(target) => {
                track.target = target;
                true
            }
            None => false,
        });
    }

    /// Move the playhead by `dt` and pose every target except `held`
    pub fn advance(&mut self, dt: f32, scene: &mut SceneGraph, held: Option<NodeId>) {
        if !self.playing {
            return;
        }
        self.time += dt;
        if self.time > self.duration {
            if self.looping && self.duration > 0.0 {
                self.time %= self.duration;
            } else {
                self.time = self.duration;
                self.playing = false;
            }
        }
        for track in self.tracks.iter().filter(|t| Some(t.target) != held) {
            track.apply(self.time, scene);
        }
    }
}

/// The player's clips. At most one clip plays at any time.
#[derive(Debug, Default)]
pub struct AnimationClipSet {
    clips: BTreeMap<String, AnimationClip>,
    current: Option<String>,
}

impl AnimationClipSet {
    pub fn new(clips: impl IntoIterator<Item = AnimationClip>) -> Self {
        let mut clips: BTreeMap<String, AnimationClip> =
            clips.into_iter().map(|c| (c.name.clone(), c)).collect();
        clips.values_mut().for_each(AnimationClip::stop);
        Self { clips, current: None }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clips.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clips.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn playing_count(&self) -> usize {
        self.clips.values().filter(|c| c.is_playing()).count()
    }

    /// Loop `name`, or `fallback` when `name` is missing. Stops whatever played before.
    /// Requesting the clip already playing keeps it running. Returns the playing clip.
    pub fn play_exclusive(&mut self, name: &str, fallback: &str) -> Option<&str> {
        let chosen = if self.clips.contains_key(name) {
            name
        } else if self.clips.contains_key(fallback) {
            fallback
        } else {
            return self.current.as_deref();
        };

        if self.current.as_deref() == Some(chosen)
            && self.clips.get(chosen).is_some_and(AnimationClip::is_playing)
        {
            return self.current.as_deref();
        }

        self.clips.values_mut().for_each(AnimationClip::stop);
        if let Some(clip) = self.clips.get_mut(chosen) {
            clip.play(true);
        }
        self.current = Some(chosen.to_string());
        self.current.as_deref()
    }

    pub fn stop_all(&mut self) {
        self.clips.values_mut().for_each(AnimationClip::stop);
        self.current = None;
    }

    pub fn advance(&mut self, dt: f32, scene: &mut SceneGraph, held: Option<NodeId>) {
        for clip in self.clips.values_mut() {
            clip.advance(dt, scene, held);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scene::Transform;

    fn clip(name: &str, target: NodeId) -> AnimationClip {
        AnimationClip::new(
            name,
            vec![Track {
                target,
                times: vec![0.0, 1.0],
                values: Keyframes::Scale(vec![Vec3::ONE, Vec3::splat(3.0)]),
            }],
        )
    }

    #[test]
    fn switching_clips_keeps_one_playing() {
        let mut scene = SceneGraph::new();
        let n = scene.add_node("n", None, Transform::IDENTITY);
        let mut set = AnimationClipSet::new([clip("idle", n), clip("run", n), clip("jump", n)]);

        assert_eq!(set.play_exclusive("idle", "default"), Some("idle"));
        assert_eq!(set.play_exclusive("run", "default"), Some("run"));
        assert_eq!(set.playing_count(), 1);
        assert_eq!(set.play_exclusive("jump", "default"), Some("jump"));
        assert_eq!(set.playing_count(), 1);
    }

    #[test]
    fn missing_clip_uses_fallback_or_does_nothing() {
        let mut scene = SceneGraph::new();
        let n = scene.add_node("n", None, Transform::IDENTITY);
        let mut set = AnimationClipSet::new([clip("default", n)]);
        assert_eq!(set.play_exclusive("run", "default"), Some("default"));

        let mut empty = AnimationClipSet::default();
        assert_eq!(empty.play_exclusive("run", "default"), None);
        assert_eq!(empty.playing_count(), 0);
    }

    #[test]
    fn samples_between_keyframes() {
        let mut scene = SceneGraph::new();
        let n = scene.add_node("n", None, Transform::IDENTITY);
        let mut c = clip("grow", n);
        c.play(false);
        c.advance(0.5, &mut scene, None);
        assert!(scene.get(n).unwrap().transform.scale.abs_diff_eq(Vec3::splat(2.0), 1e-5));
        c.advance(1.0, &mut scene, None);
        assert!(!c.is_playing(), "non-looping clip stops at the end");
        assert_eq!(scene.get(n).unwrap().transform.scale, Vec3::splat(3.0));
    }

    #[test]
    fn retarget_drops_unmapped_tracks() {
        let mut scene = SceneGraph::new();
        let root = scene.add_node("root", None, Transform::IDENTITY);
        let mesh = scene.add_node("mesh", Some(root), Transform::IDENTITY);
        let other = scene.add_node("other", Some(root), Transform::IDENTITY);
        let mut c = AnimationClip::new("c", vec![clip("a", root).tracks[0].clone(), clip("b", other).tracks[0].clone()]);

        c.retarget(|t| (t == root || t == mesh).then_some(mesh));

        assert_eq!(c.tracks.len(), 1);
        assert_eq!(c.tracks[0].target, mesh);
    }

    #[test]
    fn held_node_keeps_its_own_transform() {
        let mut scene = SceneGraph::new();
        let held = scene.add_node("held", None, Transform::IDENTITY);
        let free = scene.add_node("free", None, Transform::IDENTITY);
        let mut c = AnimationClip::new("grow", vec![clip("a", held).tracks[0].clone(), clip("b", free).tracks[0].clone()]);
        scene.get_mut(held).unwrap().transform.scale = Vec3::splat(5.0);

        c.play(true);
        c.advance(0.5, &mut scene, Some(held));

        assert_eq!(scene.get(held).unwrap().transform.scale, Vec3::splat(5.0));
        assert!(scene.get(free).unwrap().transform.scale.abs_diff_eq(Vec3::splat(2.0), 1e-5));
    }
}
