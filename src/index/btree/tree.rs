use std::path::Path;

use log::debug;

use crate::core::errors::DbError;
use crate::index::btree::node::{InteriorNode, LeafNode, StatNode};
use crate::index::key::{format_key, KeyProfile, KeyTuple};
use crate::storage::block::{BlockFile, DEFAULT_BLOCK_SIZE};

/// The B+ tree core: unique keys mapped to opaque value bytes, stored
/// in one block file. A stat block records the root id and height;
/// interior nodes route by strictly increasing boundaries; leaves hold
/// the values and chain together in key order.
///
/// The tree grows by splitting on the way back up from an insert and
/// never merges on delete.
#[derive(Debug)]
pub struct BTreeFile {
    file: BlockFile,
    profile: KeyProfile,
    stat: Option<StatNode>,
}

impl BTreeFile {
    pub fn new(dir: &Path, name: &str, profile: KeyProfile) -> Self {
        Self::with_block_size(dir, name, profile, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(
        dir: &Path,
        name: &str,
        profile: KeyProfile,
        block_size: usize,
    ) -> Self {
        Self {
            file: BlockFile::new(dir, name, block_size),
            profile,
            stat: None,
        }
    }

    /// Create the file with an empty root leaf under the stat block.
    pub fn create(&mut self) -> Result<(), DbError> {
        self.file.create()?;
        let root = LeafNode::create(&mut self.file)?;
        root.save(&mut self.file, &self.profile)?;
        self.stat = Some(StatNode::create(&mut self.file, root.id)?);
        debug!("created btree file {:?}, root {}", self.file.path(), root.id);
        Ok(())
    }

    pub fn open(&mut self) -> Result<(), DbError> {
        if self.stat.is_some() {
            return Ok(());
        }
        self.file.open()?;
        self.stat = Some(StatNode::load(&mut self.file)?);
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), DbError> {
        self.stat = None;
        self.file.close()
    }

    pub fn drop_file(&mut self) -> Result<(), DbError> {
        self.stat = None;
        self.file.delete()
    }

    pub fn height(&mut self) -> Result<u32, DbError> {
        self.open()?;
        Ok(self.stat.as_ref().expect("opened").height)
    }

    pub fn begin_write(&mut self) {
        self.file.begin_write();
    }

    pub fn end_write(&mut self) -> Result<(), DbError> {
        self.file.end_write()
    }

    /// Exact-match lookup.
    pub fn lookup(&mut self, key: &KeyTuple) -> Result<Option<Vec<u8>>, DbError> {
        self.open()?;
        let leaf_id = self.find_leaf(Some(key))?;
        let leaf = LeafNode::load(&mut self.file, leaf_id, &self.profile)?;
        Ok(leaf.entries.get(key).cloned())
    }

    /// Insert a unique key. Splits leaves and interior nodes on the way
    /// back up; a root split grows the tree by one level.
    pub fn insert(&mut self, key: KeyTuple, value: Vec<u8>) -> Result<(), DbError> {
        self.open()?;
        let stat = self.stat.as_ref().expect("opened");
        let (root_id, height) = (stat.root_id, stat.height);

        let Some((sibling_id, boundary)) = self.insert_at(root_id, height, key, value)? else {
            return Ok(());
        };

        let mut root = InteriorNode::create(&mut self.file)?;
        root.first = root_id;
        root.insert(boundary, sibling_id)?;
        root.save(&mut self.file, &self.profile)?;

        let file = &mut self.file;
        let stat = self.stat.as_mut().expect("opened");
        stat.root_id = root.id;
        stat.height += 1;
        stat.save(file)?;
        debug!("root split, new root {} at height {}", root.id, stat.height);
        Ok(())
    }

    /// Remove a key from its leaf. The tree structure above the leaf is
    /// left as-is.
    pub fn delete(&mut self, key: &KeyTuple) -> Result<(), DbError> {
        self.open()?;
        let leaf_id = self.find_leaf(Some(key))?;
        let mut leaf = LeafNode::load(&mut self.file, leaf_id, &self.profile)?;
        if leaf.entries.remove(key).is_none() {
            return Err(DbError::NotFound(format!("key ({})", format_key(key))));
        }
        leaf.save(&mut self.file, &self.profile)
    }

    /// Entries with `min <= key <= max`, in ascending key order. `None`
    /// bounds are open ends.
    pub fn range(
        &mut self,
        min: Option<&KeyTuple>,
        max: Option<&KeyTuple>,
    ) -> Result<RangeIter<'_>, DbError> {
        self.open()?;
        let leaf_id = self.find_leaf(min)?;
        let leaf = LeafNode::load(&mut self.file, leaf_id, &self.profile)?;
        Ok(RangeIter {
            tree: self,
            min: min.cloned(),
            max: max.cloned(),
            next_leaf: leaf.next_leaf,
            entries: leaf.entries.into_iter(),
            done: false,
        })
    }

    /// Descend to the leaf that would hold `key`, or the leftmost leaf
    /// when no key is given.
    fn find_leaf(&mut self, key: Option<&KeyTuple>) -> Result<u32, DbError> {
        let stat = self.stat.as_ref().expect("opened");
        let (mut block_id, mut depth) = (stat.root_id, stat.height);
        while depth > 1 {
            let node = InteriorNode::load(&mut self.file, block_id, &self.profile)?;
            block_id = match key {
                Some(key) => node.find(key),
                None => node.first,
            };
            depth -= 1;
        }
        Ok(block_id)
    }

    /// Recursive insert. Returns the new right sibling and its minimum
    /// key when this level split.
    fn insert_at(
        &mut self,
        block_id: u32,
        depth: u32,
        key: KeyTuple,
        value: Vec<u8>,
    ) -> Result<Option<(u32, KeyTuple)>, DbError> {
        if depth == 1 {
            let mut leaf = LeafNode::load(&mut self.file, block_id, &self.profile)?;
            if leaf.entries.contains_key(&key) {
                return Err(DbError::DuplicateKey(format!("({})", format_key(&key))));
            }
            if leaf.would_fit(&key, value.len(), &self.profile, self.file.block_size())? {
                leaf.entries.insert(key, value);
                leaf.save(&mut self.file, &self.profile)?;
                return Ok(None);
            }
            return self.split_leaf(leaf, key, value).map(Some);
        }

        let mut node = InteriorNode::load(&mut self.file, block_id, &self.profile)?;
        let child = node.find(&key);
        let Some((sibling_id, boundary)) = self.insert_at(child, depth - 1, key, value)? else {
            return Ok(None);
        };
        if node.would_fit(&boundary, &self.profile, self.file.block_size())? {
            node.insert(boundary, sibling_id)?;
            node.save(&mut self.file, &self.profile)?;
            return Ok(None);
        }
        self.split_interior(node, boundary, sibling_id).map(Some)
    }

    /// Split a full leaf around the incoming entry. The right sibling
    /// takes the upper half and inherits the leaf chain link.
    fn split_leaf(
        &mut self,
        mut leaf: LeafNode,
        key: KeyTuple,
        value: Vec<u8>,
    ) -> Result<(u32, KeyTuple), DbError> {
        let mut sibling = LeafNode::create(&mut self.file)?;
        leaf.entries.insert(key, value);
        let keys: Vec<&KeyTuple> = leaf.entries.keys().collect();
        let boundary = keys[keys.len() / 2].clone();

        sibling.entries = leaf.entries.split_off(&boundary);
        sibling.next_leaf = leaf.next_leaf;
        leaf.next_leaf = sibling.id;

        leaf.save(&mut self.file, &self.profile)?;
        sibling.save(&mut self.file, &self.profile)?;
        debug!(
            "split leaf {} -> {} ({} + {} entries)",
            leaf.id,
            sibling.id,
            leaf.entries.len(),
            sibling.entries.len()
        );
        Ok((sibling.id, boundary))
    }

    /// Split an interior node after inserting the new separator
    /// (oversizing is fine, the node only lives in memory until save).
    /// The median separator is promoted, not kept in either half.
    fn split_interior(
        &mut self,
        mut node: InteriorNode,
        boundary: KeyTuple,
        block_id: u32,
    ) -> Result<(u32, KeyTuple), DbError> {
        node.insert(boundary, block_id)?;
        let split = node.boundaries.len() / 2;
        let promoted = node.boundaries[split].clone();

        let mut sibling = InteriorNode::create(&mut self.file)?;
        sibling.first = node.pointers[split];
        sibling.boundaries = node.boundaries.split_off(split + 1);
        sibling.pointers = node.pointers.split_off(split + 1);
        node.boundaries.truncate(split);
        node.pointers.truncate(split);

        node.save(&mut self.file, &self.profile)?;
        sibling.save(&mut self.file, &self.profile)?;
        debug!("split interior {} -> {}, promoted boundary", node.id, sibling.id);
        Ok((sibling.id, promoted))
    }
}

/// Streaming range scan following the leaf chain. Yields owned
/// `(key, value)` pairs; stays valid across reads but not across
/// writes to the same tree.
pub struct RangeIter<'a> {
    tree: &'a mut BTreeFile,
    min: Option<KeyTuple>,
    max: Option<KeyTuple>,
    next_leaf: u32,
    entries: std::collections::btree_map::IntoIter<KeyTuple, Vec<u8>>,
    done: bool,
}

impl Iterator for RangeIter<'_> {
    type Item = Result<(KeyTuple, Vec<u8>), DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.entries.next() {
                Some((key, value)) => {
                    if let Some(min) = &self.min {
                        if &key < min {
                            continue;
                        }
                    }
                    if let Some(max) = &self.max {
                        if &key > max {
                            self.done = true;
                            return None;
                        }
                    }
                    return Some(Ok((key, value)));
                }
                None => {
                    if self.next_leaf == 0 {
                        self.done = true;
                        return None;
                    }
                    let leaf = match LeafNode::load(
                        &mut self.tree.file,
                        self.next_leaf,
                        &self.tree.profile,
                    ) {
                        Ok(leaf) => leaf,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    };
                    self.next_leaf = leaf.next_leaf;
                    self.entries = leaf.entries.into_iter();
                }
            }
        }
    }
}
