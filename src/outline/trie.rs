use std::hash::{Hash, Hasher};
use std::io;
use std::io::prelude::*;

use indexmap::{Equivalent, IndexMap};

use super::{END_MINDMAP, START_MINDMAP};
use crate::parse::stacktrace::StackSample;

/// Marker character for a level in a stack outline.
const STACK_LEVEL: u8 = b'-';

/// The label of a trie node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Key {
    /// A stack frame.
    Frame(String),
    /// How many samples ended exactly at the parent node.
    Times(usize),
}

impl Key {
    /// Whether this is a frame rather than an occurrence counter.
    pub fn is_frame(&self) -> bool {
        matches!(self, Key::Frame(_))
    }
}

// Hashed by hand so that a borrowed `FrameKey` can look up a `Key::Frame` without allocating.
impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Key::Frame(frame) => {
                state.write_u8(0);
                frame.hash(state);
            }
            Key::Times(times) => {
                state.write_u8(1);
                times.hash(state);
            }
        }
    }
}

struct FrameKey<'a>(&'a str);

impl Hash for FrameKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(0);
        self.0.hash(state);
    }
}

impl Equivalent<Key> for FrameKey<'_> {
    fn equivalent(&self, key: &Key) -> bool {
        match key {
            Key::Frame(frame) => frame == self.0,
            Key::Times(_) => false,
        }
    }
}

/// A node of the trie. Children are kept in the order they were first inserted.
#[derive(Clone, Debug, Default)]
pub struct Node {
    children: IndexMap<Key, Node, ahash::RandomState>,
}

impl Node {
    /// The children of this node, in insertion order.
    pub fn children(&self) -> impl Iterator<Item = (&Key, &Node)> {
        self.children.iter()
    }

    /// The child reached through `frame`, if any.
    pub fn child(&self, frame: &str) -> Option<&Node> {
        self.children.get(&FrameKey(frame))
    }

    /// The number of samples that ended exactly here, if this node is the end of a full stack.
    pub fn times(&self) -> Option<usize> {
        self.children.keys().find_map(|key| match key {
            Key::Times(times) => Some(*times),
            Key::Frame(_) => None,
        })
    }

    fn descend(&mut self, frame: &str) -> &mut Node {
        let index = match self.children.get_index_of(&FrameKey(frame)) {
            Some(index) => index,
            None => {
                // A node that was the end of a stack is now on the way to a deeper one.
                if let Some((Key::Times(_), _)) = self.children.first() {
                    self.children.pop();
                }
                self.children
                    .insert_full(Key::Frame(frame.to_string()), Node::default())
                    .0
            }
        };
        &mut self.children[index]
    }

    fn count_full_stack(&mut self) {
        if self.children.keys().any(Key::is_frame) {
            // Only a prefix of deeper stacks.
            return;
        }
        let times = match self.children.pop() {
            Some((Key::Times(times), _)) => times + 1,
            _ => 1,
        };
        self.children.insert(Key::Times(times), Node::default());
    }
}

/// A prefix tree of stack samples.
///
/// Samples that share leading frames share nodes. A node where at least one sample ended, and
/// that no sample went deeper than, carries a counter of how many samples ended there.
#[derive(Clone, Debug, Default)]
pub struct Trie {
    root: Node,
}

impl Trie {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// The root node. It has no frame of its own.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Whether no frames have been merged.
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Merges one sample into the trie. Empty samples are ignored.
    pub fn merge(&mut self, sample: &StackSample) {
        if sample.is_empty() {
            return;
        }
        let mut node = &mut self.root;
        for frame in sample.frames() {
            node = node.descend(frame);
        }
        node.count_full_stack();
    }

    /// The outermost frame of the first sample merged, which names the outline.
    pub fn name(&self) -> Option<&str> {
        self.root.children.keys().find_map(|key| match key {
            Key::Frame(frame) => Some(frame.as_str()),
            Key::Times(_) => None,
        })
    }

    /// The number of frame nodes in the trie.
    pub fn frame_count(&self) -> usize {
        self.nodes().filter(|(key, _)| key.is_frame()).count()
    }

    /// Walks the trie depth-first, parents before children and siblings in insertion order.
    ///
    /// Yields each node's key together with its depth, where children of the root have depth 1.
    pub fn nodes(&self) -> Nodes<'_> {
        let mut pending = Vec::new();
        push_children(&mut pending, &self.root, 1);
        Nodes { pending }
    }

    /// Writes the trie as a mind map: one branch per frame, and one highlighted branch per
    /// counter.
    pub fn write_outline<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "{}", START_MINDMAP)?;
        for (key, depth) in self.nodes() {
            match key {
                Key::Frame(frame) => super::write_call(&mut writer, STACK_LEVEL, depth, frame)?,
                Key::Times(times) => {
                    super::write_counter(&mut writer, STACK_LEVEL, depth, *times)?;
                }
            }
        }
        writeln!(writer, "{}", END_MINDMAP)
    }
}

/// Iterator returned by [`Trie::nodes`].
pub struct Nodes<'a> {
    pending: Vec<(&'a Key, &'a Node, usize)>,
}

// The work list is a stack, so children go on in reverse to come off in insertion order.
fn push_children<'a>(pending: &mut Vec<(&'a Key, &'a Node, usize)>, node: &'a Node, depth: usize) {
    pending.extend(
        node.children
            .iter()
            .rev()
            .map(|(key, child)| (key, child, depth)),
    );
}

impl<'a> Iterator for Nodes<'a> {
    type Item = (&'a Key, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, node, depth) = self.pending.pop()?;
        push_children(&mut self.pending, node, depth + 1);
        Some((key, depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(frames: &[&str]) -> StackSample {
        frames.iter().copied().collect()
    }

    fn trie(samples: &[&[&str]]) -> Trie {
        let mut trie = Trie::new();
        for frames in samples {
            trie.merge(&sample(frames));
        }
        trie
    }

    fn keys(node: &Node) -> Vec<Key> {
        node.children().map(|(key, _)| key.clone()).collect()
    }

    fn frame(name: &str) -> Key {
        Key::Frame(name.to_string())
    }

    #[test]
    fn repeated_stack_is_counted() {
        let trie = trie(&[&["X", "Y"], &["X", "Y"]]);
        let x = trie.root().child("X").unwrap();
        let y = x.child("Y").unwrap();
        assert_eq!(keys(x), vec![frame("Y")]);
        assert_eq!(keys(y), vec![Key::Times(2)]);
        assert_eq!(y.times(), Some(2));
        assert_eq!(trie.frame_count(), 2);
    }

    #[test]
    fn prefix_gets_no_counter() {
        let trie = trie(&[&["X"], &["X", "Z"]]);
        let x = trie.root().child("X").unwrap();
        assert_eq!(keys(x), vec![frame("Z")]);
        assert_eq!(x.times(), None);
        assert_eq!(x.child("Z").unwrap().times(), Some(1));

        // the other way around, too
        let trie = self::trie(&[&["X", "Z"], &["X"]]);
        let x = trie.root().child("X").unwrap();
        assert_eq!(keys(x), vec![frame("Z")]);
    }

    #[test]
    fn empty_sample_is_ignored() {
        let mut trie = Trie::new();
        trie.merge(&StackSample::default());
        assert!(trie.is_empty());
        assert_eq!(trie.name(), None);
    }

    #[test]
    fn frame_count_bounded_by_samples() {
        let samples: &[&[&str]] = &[
            &["a", "b", "c"],
            &["a", "b", "d"],
            &["e", "b"],
            &["a", "f"],
        ];
        let total: usize = samples.iter().map(|s| s.len()).sum();
        let shared = trie(samples);
        assert_eq!(shared.frame_count(), 7);
        assert!(shared.frame_count() < total);

        let disjoint = trie(&[&["a", "b"], &["c"], &["d", "e", "f"]]);
        assert_eq!(disjoint.frame_count(), 6);
    }

    #[test]
    fn traversal_keeps_insertion_order() {
        let trie = trie(&[&["a", "c"], &["a", "b"], &["d"], &["a", "c", "e"]]);
        let visited: Vec<_> = trie.nodes().map(|(key, depth)| (key.clone(), depth)).collect();
        assert_eq!(
            visited,
            vec![
                (frame("a"), 1),
                (frame("c"), 2),
                (frame("e"), 3),
                (Key::Times(1), 4),
                (frame("b"), 2),
                (Key::Times(1), 3),
                (frame("d"), 1),
                (Key::Times(1), 2),
            ]
        );
        assert_eq!(trie.name(), Some("a"));
    }

    #[test]
    fn outline() {
        let trie = trie(&[
            &["schedule", "do_nanosleep", "hrtimer_nanosleep"],
            &["schedule", "do_nanosleep", "hrtimer_nanosleep"],
            &["schedule", "schedule_timeout"],
        ]);
        let mut out = Vec::new();
        trie.write_outline(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\
@startmindmap
- schedule()
-- do_nanosleep()
--- hrtimer_nanosleep()
----[#lightgreen] 2 times
-- schedule_timeout()
---[#lightgreen] 1 times
@endmindmap
"
        );
    }
}
