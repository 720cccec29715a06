//! Outline engine behind OrgFlow documents.
//! A document is a flat, ordered list of leveled blocks. Hierarchy, visibility and
//! navigation are derived by scanning levels; nothing stores parent or child links.

pub mod core {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use serde_with::{TimestampMilliSeconds, serde_as};
    use std::{fmt, path::Path, str::FromStr};
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DocumentId(pub Uuid);

    impl DocumentId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl fmt::Display for DocumentId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Display::fmt(&self.0, f)
        }
    }

    impl FromStr for DocumentId {
        type Err = uuid::Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Uuid::parse_str(s).map(Self)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct BlockId(pub Uuid);

    impl BlockId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl fmt::Display for BlockId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Display::fmt(&self.0, f)
        }
    }

    impl FromStr for BlockId {
        type Err = uuid::Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Uuid::parse_str(s).map(Self)
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// One outline node: a heading line with its nesting level.
    ///
    /// Edits never mutate a block field by field; they replace the block with a
    /// copy built by one of the `with_*` methods, which keeps `id` untouched.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Block {
        pub id: BlockId,
        /// Depth starting at 1. `Block::new` and deserialization reject 0.
        #[serde(deserialize_with = "deserialize_level")]
        pub level: u32,
        #[serde(default)]
        pub content: String,
        /// Local flag only. Whether the block is displayed also depends on its
        /// ancestors, see [`crate::visibility::is_visible`].
        #[serde(default)]
        pub collapsed: bool,
    }

    impl Block {
        pub fn new(level: u32, content: impl Into<String>) -> Result<Self, DomainError> {
            if level == 0 {
                return Err(DomainError::InvalidLevel(level));
            }
            Ok(Self::at_level(level, content))
        }

        /// The empty top-level block every fresh document starts with.
        pub fn seed() -> Self {
            Self::at_level(1, "")
        }

        pub(crate) fn at_level(level: u32, content: impl Into<String>) -> Self {
            Self {
                id: BlockId::new(),
                level: level.max(1),
                content: content.into(),
                collapsed: false,
            }
        }

        pub fn with_content(&self, content: impl Into<String>) -> Self {
            Self {
                content: content.into(),
                ..self.clone()
            }
        }

        pub fn with_level(&self, level: u32) -> Self {
            Self {
                level: level.max(1),
                ..self.clone()
            }
        }

        pub fn with_collapsed(&self, collapsed: bool) -> Self {
            Self {
                collapsed,
                ..self.clone()
            }
        }
    }

    fn deserialize_level<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let level = u32::deserialize(deserializer)?;
        if level == 0 {
            return Err(serde::de::Error::custom(DomainError::InvalidLevel(level)));
        }
        Ok(level)
    }

    /// Index of the block with `id`, if present.
    pub fn position(blocks: &[Block], id: BlockId) -> Option<usize> {
        blocks.iter().position(|b| b.id == id)
    }

    /* ------------------------------ Aggregate ------------------------------ */

    pub const UNTITLED: &str = "Untitled";

    /// Aggregate root: a named outline. Serializes to the persisted shape
    /// `{ id, name, blocks, lastModified }` with `lastModified` in epoch milliseconds.
    #[serde_as]
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Document {
        pub id: DocumentId,
        pub name: String,
        #[serde(default)]
        pub blocks: Vec<Block>,
        #[serde_as(as = "TimestampMilliSeconds<i64>")]
        pub last_modified: DateTime<Utc>,
    }

    impl Document {
        pub fn new(name: impl Into<String>, blocks: Vec<Block>) -> Self {
            Self {
                id: DocumentId::new(),
                name: name.into(),
                blocks,
                last_modified: now(),
            }
        }

        /// A fresh document holding a single empty block.
        pub fn untitled() -> Self {
            Self::new(UNTITLED, vec![Block::seed()])
        }

        /// New snapshot with `blocks` swapped in and the modification time refreshed.
        pub fn with_blocks(&self, blocks: Vec<Block>) -> Self {
            Self {
                id: self.id,
                name: self.name.clone(),
                blocks,
                last_modified: now(),
            }
        }

        /// New snapshot with a trimmed name; a blank name falls back to `Untitled`.
        pub fn renamed(&self, name: &str) -> Self {
            let trimmed = name.trim();
            let name = if trimmed.is_empty() { UNTITLED } else { trimmed };
            Self {
                name: name.to_string(),
                last_modified: now(),
                ..self.clone()
            }
        }

        pub fn block(&self, id: BlockId) -> Option<&Block> {
            self.blocks.iter().find(|b| b.id == id)
        }
    }

    /// Current time truncated to the millisecond precision the persisted shape keeps.
    pub(crate) fn now() -> DateTime<Utc> {
        let now = Utc::now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }

    /* ---------------------------- Value Objects ---------------------------- */

    /// Plain-text heading dialect used at import/export boundaries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum TextFormat {
        #[serde(rename = "org")]
        Org,
        #[serde(rename = "md")]
        Markdown,
    }

    impl TextFormat {
        pub fn extension(self) -> &'static str {
            match self {
                TextFormat::Org => "org",
                TextFormat::Markdown => "md",
            }
        }

        /// Character repeated `level` times in front of a heading.
        pub fn marker(self) -> char {
            match self {
                TextFormat::Org => '*',
                TextFormat::Markdown => '#',
            }
        }

        pub fn from_extension(ext: &str) -> Result<Self, DomainError> {
            match ext.to_ascii_lowercase().as_str() {
                "org" => Ok(TextFormat::Org),
                "md" => Ok(TextFormat::Markdown),
                other => Err(DomainError::UnsupportedFormat(other.to_string())),
            }
        }

        /// Derives the format from a file-name suffix; anything but `.org`/`.md` is rejected.
        pub fn from_path(path: &Path) -> Result<Self, DomainError> {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            Self::from_extension(ext)
        }
    }

    impl fmt::Display for TextFormat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.extension())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Direction {
        Up,
        Down,
    }

    impl Direction {
        /// Neighbouring index in this direction; `None` when stepping above 0.
        pub fn step(self, index: usize) -> Option<usize> {
            match self {
                Direction::Up => index.checked_sub(1),
                Direction::Down => index.checked_add(1),
            }
        }
    }

    impl fmt::Display for Direction {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Direction::Up => f.write_str("up"),
                Direction::Down => f.write_str("down"),
            }
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum DomainError {
        #[error("block level {0} is out of bounds (must be at least 1)")]
        InvalidLevel(u32),
        #[error("unsupported file format {0:?} (expected .org or .md)")]
        UnsupportedFormat(String),
        #[error("no document with id {0}")]
        UnknownDocument(DocumentId),
        #[error("can't delete the last document")]
        LastDocument,
    }

}

pub mod visibility {
    //! Hierarchy queries derived from levels alone.
    //!
    //! Visibility scans backward from a block: any preceding block with a lower
    //! level hides it when collapsed, and the scan ends at the first expanded
    //! block exactly one level up. Results are never cached on the blocks, since
    //! any ancestor may be toggled independently.

    use crate::core::Block;

    /// Indices of the tree ancestors of `blocks[index]`, nearest first: each one is
    /// lower than every block kept before it.
    pub fn ancestors(blocks: &[Block], index: usize) -> impl Iterator<Item = usize> + '_ {
        let mut threshold = blocks.get(index).map_or(0, |b| b.level);
        (0..index.min(blocks.len())).rev().filter_map(move |i| {
            let level = blocks[i].level;
            if level < threshold {
                threshold = level;
                Some(i)
            } else {
                None
            }
        })
    }

    /// Whether the block at `index` is displayed. Out-of-range indices are never visible.
    pub fn is_visible(blocks: &[Block], index: usize) -> bool {
        let Some(block) = blocks.get(index) else {
            return false;
        };
        for prev in blocks[..index].iter().rev() {
            if prev.level >= block.level {
                continue;
            }
            if prev.collapsed {
                return false;
            }
            if prev.level == block.level - 1 {
                return true;
            }
        }
        true
    }

    pub fn parent_index(blocks: &[Block], index: usize) -> Option<usize> {
        ancestors(blocks, index).next()
    }

    /// The display predicate for a collapse toggle: the next block is strictly deeper.
    pub fn has_children(blocks: &[Block], index: usize) -> bool {
        match (blocks.get(index), blocks.get(index + 1)) {
            (Some(block), Some(next)) => next.level > block.level,
            _ => false,
        }
    }

    /// Exclusive end of the subtree rooted at `index`.
    pub fn subtree_end(blocks: &[Block], index: usize) -> usize {
        let Some(root) = blocks.get(index) else {
            return blocks.len();
        };
        blocks[index + 1..]
            .iter()
            .position(|b| b.level <= root.level)
            .map_or(blocks.len(), |offset| index + 1 + offset)
    }

    /// Indices of the blocks currently displayed, in document order.
    pub fn visible_indices(blocks: &[Block]) -> Vec<usize> {
        (0..blocks.len()).filter(|&i| is_visible(blocks, i)).collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::codec::parse_org_content;

        fn outline(levels: &[u32]) -> Vec<Block> {
            levels
                .iter()
                .enumerate()
                .map(|(i, &level)| Block::new(level, format!("b{i}")).unwrap())
                .collect()
        }

        fn collapse(blocks: &mut [Block], index: usize) {
            blocks[index] = blocks[index].with_collapsed(true);
        }

        #[test]
        fn single_collapse_hides_only_its_subtree() {
            // L1, L2a, L3 (child of L2a), L2b
            let mut blocks = outline(&[1, 2, 3, 2]);
            collapse(&mut blocks, 1);
            assert!(is_visible(&blocks, 0));
            assert!(is_visible(&blocks, 1));
            assert!(!is_visible(&blocks, 2));
            assert!(is_visible(&blocks, 3));
        }

        #[test]
        fn deep_collapsed_ancestor_hides_descendants() {
            let mut blocks = outline(&[1, 2, 3, 4]);
            collapse(&mut blocks, 0);
            assert_eq!(visible_indices(&blocks), vec![0]);
        }

        #[test]
        fn collapsed_sibling_subtree_is_not_an_ancestor() {
            let mut blocks = parse_org_content("* A\n** B\n** C\n*** D");
            collapse(&mut blocks, 1);
            assert_eq!(visible_indices(&blocks), vec![0, 1, 2, 3]);

            blocks[1] = blocks[1].with_collapsed(false);
            collapse(&mut blocks, 2);
            assert_eq!(visible_indices(&blocks), vec![0, 1, 2]);

            blocks[2] = blocks[2].with_collapsed(false);
            collapse(&mut blocks, 0);
            assert_eq!(visible_indices(&blocks), vec![0]);
        }

        #[test]
        fn level_jump_checks_every_lower_block() {
            // no level-2 block between the root and the level-3 block, so the scan
            // keeps going past the second root and reaches the collapsed block
            let mut blocks = outline(&[1, 2, 1, 3]);
            collapse(&mut blocks, 1);
            assert!(!is_visible(&blocks, 3));
            assert!(is_visible(&blocks, 2));
            assert_eq!(parent_index(&blocks, 3), Some(2));
        }

        #[test]
        fn collapsed_root_hides_block_after_level_jump() {
            let mut blocks = outline(&[1, 1, 3]);
            collapse(&mut blocks, 0);
            assert!(is_visible(&blocks, 1));
            assert!(!is_visible(&blocks, 2));
        }

        #[test]
        fn expanded_immediate_parent_ends_the_scan() {
            let mut blocks = outline(&[1, 2, 1, 2, 3]);
            collapse(&mut blocks, 1);
            assert!(is_visible(&blocks, 4));
        }

        #[test]
        fn deep_levels_do_not_overflow() {
            let mut blocks = outline(&[u32::MAX - 1, u32::MAX]);
            collapse(&mut blocks, 0);
            assert!(!is_visible(&blocks, 1));
        }

        #[test]
        fn out_of_range_is_not_visible() {
            let blocks = outline(&[1]);
            assert!(!is_visible(&blocks, 1));
            assert!(!is_visible(&[], 0));
        }

        #[test]
        fn hierarchy_queries() {
            let blocks = outline(&[1, 2, 3, 2, 1]);
            assert_eq!(ancestors(&blocks, 2).collect::<Vec<_>>(), vec![1, 0]);
            assert_eq!(parent_index(&blocks, 3), Some(0));
            assert_eq!(parent_index(&blocks, 4), None);
            assert!(has_children(&blocks, 0));
            assert!(has_children(&blocks, 1));
            assert!(!has_children(&blocks, 2));
            assert!(!has_children(&blocks, 4));
            assert_eq!(subtree_end(&blocks, 0), 4);
            assert_eq!(subtree_end(&blocks, 1), 3);
            assert_eq!(subtree_end(&blocks, 4), 5);
        }
    }
}

pub mod editor {
    //! Structural edits over the flat block sequence.
    //!
    //! The in-place functions report whether they changed anything; a failed
    //! precondition leaves the slice untouched. [`Edit::apply`] and
    //! [`Document::apply`] wrap them into snapshot form.

    use crate::core::{Block, BlockId, Document, position};
    use tracing::debug;

    /// A single structural edit addressed by block id.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Edit {
        ToggleCollapse(BlockId),
        UpdateContent { id: BlockId, content: String },
        Indent(BlockId),
        Unindent(BlockId),
    }

    impl Edit {
        pub fn block_id(&self) -> BlockId {
            match self {
                Edit::ToggleCollapse(id)
                | Edit::Indent(id)
                | Edit::Unindent(id)
                | Edit::UpdateContent { id, .. } => *id,
            }
        }

        pub fn apply_in_place(&self, blocks: &mut [Block]) -> bool {
            match self {
                Edit::ToggleCollapse(id) => toggle_collapse(blocks, *id),
                Edit::UpdateContent { id, content } => update_content(blocks, *id, content),
                Edit::Indent(id) => indent(blocks, *id),
                Edit::Unindent(id) => unindent(blocks, *id),
            }
        }

        /// The edited sequence, or `None` when the edit is a no-op.
        pub fn apply(&self, blocks: &[Block]) -> Option<Vec<Block>> {
            let mut next = blocks.to_vec();
            self.apply_in_place(&mut next).then_some(next)
        }
    }

    impl Document {
        /// Applies `edit` and returns the resulting snapshot. `last_modified` only
        /// moves when the blocks actually changed.
        pub fn apply(&self, edit: &Edit) -> Document {
            match edit.apply(&self.blocks) {
                Some(blocks) => self.with_blocks(blocks),
                None => self.clone(),
            }
        }
    }

    /// Flips the block's own flag. Descendant flags are left alone, so a nested
    /// collapse survives its ancestor being collapsed and expanded again.
    pub fn toggle_collapse(blocks: &mut [Block], id: BlockId) -> bool {
        let Some(i) = position(blocks, id) else {
            debug!(%id, "toggle ignored: unknown block");
            return false;
        };
        blocks[i] = blocks[i].with_collapsed(!blocks[i].collapsed);
        true
    }

    pub fn update_content(blocks: &mut [Block], id: BlockId, content: &str) -> bool {
        let Some(i) = position(blocks, id) else {
            debug!(%id, "content update ignored: unknown block");
            return false;
        };
        if blocks[i].content == content {
            return false;
        }
        blocks[i] = blocks[i].with_content(content);
        true
    }

    /// Moves a block one level deeper. Allowed only when it is not the first block
    /// and its level is at most one deeper than its predecessor's.
    pub fn indent(blocks: &mut [Block], id: BlockId) -> bool {
        let Some(i) = position(blocks, id) else {
            debug!(%id, "indent ignored: unknown block");
            return false;
        };
        if i == 0 {
            debug!(%id, "indent ignored: first block");
            return false;
        }
        let (prev, level) = (blocks[i - 1].level, blocks[i].level);
        if level > prev.saturating_add(1) {
            debug!(%id, level, prev, "indent ignored: already deeper than predecessor allows");
            return false;
        }
        let Some(deeper) = level.checked_add(1) else {
            debug!(%id, level, "indent ignored: level at maximum");
            return false;
        };
        blocks[i] = blocks[i].with_level(deeper);
        true
    }

    /// Moves a block one level shallower; level 1 is the floor.
    pub fn unindent(blocks: &mut [Block], id: BlockId) -> bool {
        let Some(i) = position(blocks, id) else {
            debug!(%id, "unindent ignored: unknown block");
            return false;
        };
        let level = blocks[i].level;
        if level <= 1 {
            debug!(%id, "unindent ignored: already top level");
            return false;
        }
        blocks[i] = blocks[i].with_level(level - 1);
        true
    }

}

pub mod navigator {
    use crate::core::{Block, BlockId, Direction, position};
    use crate::visibility::is_visible;

    /// The next displayed block from `from` in `direction`, skipping blocks hidden
    /// under collapsed ancestors. No wraparound; `None` at either end or for an
    /// unknown id.
    pub fn navigate(blocks: &[Block], from: BlockId, direction: Direction) -> Option<BlockId> {
        let mut index = position(blocks, from)?;
        loop {
            index = direction.step(index)?;
            let candidate = blocks.get(index)?;
            if is_visible(blocks, index) {
                return Some(candidate.id);
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn outline(levels: &[u32]) -> Vec<Block> {
            levels
                .iter()
                .map(|&level| Block::new(level, "").unwrap())
                .collect()
        }

        #[test]
        fn skips_collapsed_subtree() {
            // L1, L2a (collapsed), L3, L2b
            let mut blocks = outline(&[1, 2, 3, 2]);
            blocks[1] = blocks[1].with_collapsed(true);
            let ids: Vec<_> = blocks.iter().map(|b| b.id).collect();

            assert_eq!(navigate(&blocks, ids[0], Direction::Down), Some(ids[1]));
            assert_eq!(navigate(&blocks, ids[1], Direction::Down), Some(ids[3]));
            assert_eq!(navigate(&blocks, ids[3], Direction::Up), Some(ids[1]));
        }

        #[test]
        fn stops_at_edges() {
            let blocks = outline(&[1, 2]);
            assert_eq!(navigate(&blocks, blocks[0].id, Direction::Up), None);
            assert_eq!(navigate(&blocks, blocks[1].id, Direction::Down), None);
        }

        #[test]
        fn hidden_tail_yields_none() {
            let mut blocks = outline(&[1, 2, 3]);
            blocks[1] = blocks[1].with_collapsed(true);
            assert_eq!(navigate(&blocks, blocks[1].id, Direction::Down), None);
        }

        #[test]
        fn unknown_start_yields_none() {
            let blocks = outline(&[1, 1]);
            assert_eq!(navigate(&blocks, BlockId::new(), Direction::Down), None);
        }
    }
}

pub mod codec {
    //! Org (`*`) and Markdown (`#`) heading dialects.
    //!
    //! Both directions are total. Export writes every block as expanded; import
    //! drops blank lines, assigns fresh ids, and keeps any line without a heading
    //! marker as a level-1 block.

    use crate::core::{Block, Document, TextFormat};
    use nom::{
        IResult,
        bytes::complete::{take_while_m_n, take_while1},
        character::complete::one_of,
        combinator::{rest, verify},
        sequence::tuple,
    };
    use tracing::trace;

    type PResult<'a, T> = IResult<&'a str, T>;

    /* ------------------------- Public entry points ------------------------- */

    pub fn serialize(blocks: &[Block], format: TextFormat) -> String {
        let marker = format.marker().to_string();
        blocks
            .iter()
            .map(|b| format!("{} {}", marker.repeat(b.level as usize), b.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn parse(text: &str, format: TextFormat) -> Vec<Block> {
        let heading: fn(&str) -> PResult<'_, (usize, &str)> = match format {
            TextFormat::Org => org_heading,
            TextFormat::Markdown => markdown_heading,
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| match heading(line) {
                Ok((_, (depth, content))) => {
                    Block::at_level(u32::try_from(depth).unwrap_or(u32::MAX), content)
                }
                Err(_) => {
                    trace!(line, %format, "no heading marker; keeping line as a level-1 block");
                    Block::at_level(1, line)
                }
            })
            .collect()
    }

    pub fn blocks_to_org(blocks: &[Block]) -> String {
        serialize(blocks, TextFormat::Org)
    }

    pub fn blocks_to_markdown(blocks: &[Block]) -> String {
        serialize(blocks, TextFormat::Markdown)
    }

    pub fn parse_org_content(text: &str) -> Vec<Block> {
        parse(text, TextFormat::Org)
    }

    pub fn parse_markdown_content(text: &str) -> Vec<Block> {
        parse(text, TextFormat::Markdown)
    }

    /// `<name>.<ext>`, with `document` standing in for an empty name.
    pub fn export_file_name(doc: &Document, format: TextFormat) -> String {
        let stem = if doc.name.is_empty() {
            "document"
        } else {
            doc.name.as_str()
        };
        format!("{stem}.{}", format.extension())
    }

    impl Document {
        /// Snapshot whose blocks are replaced by the parse of `text`. Text with no
        /// non-blank lines yields a single empty block so the document is never empty.
        pub fn import(&self, text: &str, format: TextFormat) -> Document {
            let mut blocks = parse(text, format);
            if blocks.is_empty() {
                blocks.push(Block::seed());
            }
            self.with_blocks(blocks)
        }

        pub fn export(&self, format: TextFormat) -> String {
            serialize(&self.blocks, format)
        }

        /// Starter outline for a store that has never been written.
        pub fn welcome() -> Document {
            Document::new("Welcome to OrgFlow", parse_org_content(WELCOME_ORG))
        }
    }

    const WELCOME_ORG: &str = "\
* Welcome to OrgFlow
** Getting around
*** show prints the blocks that are currently visible
*** nav moves up or down, skipping collapsed sections
** Shaping the outline
*** indent and unindent change a block's level
*** A block can sit at most one level below the block above it
*** toggle collapses or expands a block's subtree
** Documents
*** new creates a document, delete removes one
*** The last remaining document can't be deleted
*** import and export read and write .org or .md files";

    /* ------------------------------- Headings ------------------------------- */

    fn org_heading(i: &str) -> PResult<'_, (usize, &str)> {
        let (i, (stars, _, content)) =
            tuple((take_while1(|c: char| c == '*'), one_of(" \t"), non_empty_rest))(i)?;
        Ok((i, (stars.len(), content)))
    }

    fn markdown_heading(i: &str) -> PResult<'_, (usize, &str)> {
        let (i, (hashes, _, content)) = tuple((
            take_while_m_n(1, 6, |c: char| c == '#'),
            one_of(" \t"),
            non_empty_rest,
        ))(i)?;
        Ok((i, (hashes.len(), content)))
    }

    fn non_empty_rest(i: &str) -> PResult<'_, &str> {
        verify(rest, |s: &str| !s.is_empty())(i)
    }

}

pub mod collection {
    //! The ordered set of documents a user works with, plus the current selection.

    use crate::core::{Document, DocumentId, DomainError};
    use indexmap::IndexMap;
    use tracing::info;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DocumentCollection {
        documents: IndexMap<DocumentId, Document>,
        current: Option<DocumentId>,
    }

    impl DocumentCollection {
        /// Builds a collection from stored documents and selects the first one.
        /// An empty input is seeded with an untitled document.
        pub fn from_documents(documents: Vec<Document>) -> Self {
            let mut documents: IndexMap<_, _> =
                documents.into_iter().map(|doc| (doc.id, doc)).collect();
            if documents.is_empty() {
                let doc = Document::untitled();
                documents.insert(doc.id, doc);
            }
            let current = documents.keys().next().copied();
            Self { documents, current }
        }

        pub fn len(&self) -> usize {
            self.documents.len()
        }

        pub fn is_empty(&self) -> bool {
            self.documents.is_empty()
        }

        pub fn documents(&self) -> impl Iterator<Item = &Document> {
            self.documents.values()
        }

        /// Documents in order, in the shape the repository persists.
        pub fn to_vec(&self) -> Vec<Document> {
            self.documents.values().cloned().collect()
        }

        pub fn get(&self, id: DocumentId) -> Option<&Document> {
            self.documents.get(&id)
        }

        pub fn current(&self) -> Option<&Document> {
            self.current.and_then(|id| self.documents.get(&id))
        }

        pub fn select(&mut self, id: DocumentId) -> Result<(), DomainError> {
            if !self.documents.contains_key(&id) {
                return Err(DomainError::UnknownDocument(id));
            }
            self.current = Some(id);
            Ok(())
        }

        /// Appends a new untitled document and selects it.
        pub fn create(&mut self) -> DocumentId {
            let doc = Document::untitled();
            let id = doc.id;
            info!(%id, "created document");
            self.documents.insert(id, doc);
            self.current = Some(id);
            id
        }

        /// Replaces the stored snapshot that shares `doc.id`.
        pub fn update(&mut self, doc: Document) -> Result<(), DomainError> {
            match self.documents.get_mut(&doc.id) {
                Some(slot) => {
                    *slot = doc;
                    Ok(())
                }
                None => Err(DomainError::UnknownDocument(doc.id)),
            }
        }

        /// Removes a document. The last remaining document can't be deleted; when
        /// the current document goes, the first remaining one becomes current.
        pub fn delete(&mut self, id: DocumentId) -> Result<Document, DomainError> {
            if self.documents.len() <= 1 {
                return Err(DomainError::LastDocument);
            }
            let removed = self
                .documents
                .shift_remove(&id)
                .ok_or(DomainError::UnknownDocument(id))?;
            if self.current == Some(id) {
                self.current = self.documents.keys().next().copied();
            }
            info!(%id, name = %removed.name, "deleted document");
            Ok(removed)
        }

        /// Looks a document up by id, falling back to an exact name match.
        pub fn resolve(&self, key: &str) -> Option<DocumentId> {
            if let Ok(id) = key.parse::<DocumentId>() {
                if self.documents.contains_key(&id) {
                    return Some(id);
                }
            }
            self.documents
                .values()
                .find(|doc| doc.name == key)
                .map(|doc| doc.id)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn empty_input_is_seeded() {
            let collection = DocumentCollection::from_documents(vec![]);
            assert_eq!(collection.len(), 1);
            let current = collection.current().expect("current");
            assert_eq!(current.blocks.len(), 1);
        }

        #[test]
        fn create_appends_and_selects() {
            let first = Document::new("First", vec![]);
            let mut collection = DocumentCollection::from_documents(vec![first.clone()]);
            assert_eq!(collection.current().map(|d| d.id), Some(first.id));

            let id = collection.create();
            assert_eq!(collection.len(), 2);
            assert_eq!(collection.current().map(|d| d.id), Some(id));
            assert_eq!(
                collection.documents().map(|d| d.id).collect::<Vec<_>>(),
                vec![first.id, id]
            );
        }

        #[test]
        fn last_document_cannot_be_deleted() {
            let mut collection = DocumentCollection::from_documents(vec![]);
            let id = collection.current().unwrap().id;
            assert!(matches!(
                collection.delete(id),
                Err(DomainError::LastDocument)
            ));
            assert_eq!(collection.len(), 1);
        }

        #[test]
        fn deleting_current_selects_first_remaining() {
            let a = Document::new("A", vec![]);
            let b = Document::new("B", vec![]);
            let mut collection = DocumentCollection::from_documents(vec![a.clone(), b.clone()]);
            collection.select(b.id).unwrap();

            let removed = collection.delete(b.id).expect("delete");
            assert_eq!(removed.name, "B");
            assert_eq!(collection.current().map(|d| d.id), Some(a.id));

            let c = collection.create();
            assert!(matches!(
                collection.delete(DocumentId::new()),
                Err(DomainError::UnknownDocument(_))
            ));
            assert_eq!(collection.len(), 2);
            assert!(collection.get(c).is_some());
        }

        #[test]
        fn update_and_resolve() {
            let doc = Document::new("Notes", vec![]);
            let mut collection = DocumentCollection::from_documents(vec![doc.clone()]);
            collection.update(doc.renamed("Journal")).unwrap();

            assert_eq!(collection.resolve("Journal"), Some(doc.id));
            assert_eq!(collection.resolve(&doc.id.to_string()), Some(doc.id));
            assert_eq!(collection.resolve("Notes"), None);
            assert!(collection.update(Document::untitled()).is_err());
        }
    }
}

pub mod storage {
    //! Persistence boundary: the collection is stored as a JSON array of documents.

    use crate::core::Document;
    use anyhow::{Context, Result};
    use std::{
        fs,
        path::{Path, PathBuf},
    };
    use tracing::info;

    pub const DEFAULT_STORE_FILE: &str = "orgflow_documents.json";

    pub trait DocumentRepository {
        /// Load every stored document, in order.
        fn load(&self) -> Result<Vec<Document>>;

        /// Replace the stored collection with `documents`.
        fn save(&self, documents: &[Document]) -> Result<()>;
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StoreConfig {
        pub path: PathBuf,
    }

    impl Default for StoreConfig {
        fn default() -> Self {
            Self {
                path: PathBuf::from(DEFAULT_STORE_FILE),
            }
        }
    }

    /// Repository backed by a single JSON file.
    #[derive(Debug, Clone)]
    pub struct JsonFileRepository {
        config: StoreConfig,
    }

    impl JsonFileRepository {
        pub fn new(config: StoreConfig) -> Self {
            Self { config }
        }

        pub fn path(&self) -> &Path {
            &self.config.path
        }
    }

    impl DocumentRepository for JsonFileRepository {
        /// A store that doesn't exist yet is seeded with the welcome document.
        fn load(&self) -> Result<Vec<Document>> {
            let path = self.path();
            if !path.exists() {
                info!(path = %path.display(), "no document store yet; seeding welcome document");
                let documents = vec![Document::welcome()];
                self.save(&documents)?;
                return Ok(documents);
            }
            let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            serde_json::from_str(&text).with_context(|| format!("decoding documents in {:?}", path))
        }

        fn save(&self, documents: &[Document]) -> Result<()> {
            let path = self.path();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
            }
            let json = serde_json::to_string(documents).context("encoding documents")?;
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, json).with_context(|| format!("writing {:?}", tmp))?;
            fs::rename(&tmp, path).with_context(|| format!("replacing {:?}", path))?;
            info!(path = %path.display(), count = documents.len(), "saved documents");
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::editor::Edit;

        #[test]
        fn missing_store_is_seeded_and_written() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let repo = JsonFileRepository::new(StoreConfig {
                path: tmp.path().join("nested").join("docs.json"),
            });

            let docs = repo.load().expect("load");
            assert_eq!(docs.len(), 1);
            assert_eq!(docs[0].name, "Welcome to OrgFlow");
            assert!(repo.path().exists());

            let again = repo.load().expect("reload");
            assert_eq!(again, docs);
        }

        #[test]
        fn save_then_load_keeps_collapse_state() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let repo = JsonFileRepository::new(StoreConfig {
                path: tmp.path().join("docs.json"),
            });

            let doc = Document::welcome();
            let collapsed = doc.apply(&Edit::ToggleCollapse(doc.blocks[1].id));
            repo.save(&[collapsed.clone(), Document::untitled()])
                .expect("save");

            let loaded = repo.load().expect("load");
            assert_eq!(loaded.len(), 2);
            assert_eq!(loaded[0], collapsed);
            assert!(loaded[0].blocks[1].collapsed);
        }

        #[test]
        fn stored_value_is_a_json_array() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("docs.json");
            let repo = JsonFileRepository::new(StoreConfig { path: path.clone() });
            repo.save(&[Document::untitled()]).expect("save");

            let raw: serde_json::Value =
                serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
            let array = raw.as_array().expect("array");
            assert_eq!(array.len(), 1);
            assert!(array[0].get("lastModified").is_some());
        }

        #[test]
        fn corrupt_store_reports_path() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("docs.json");
            fs::write(&path, "{not json").unwrap();
            let repo = JsonFileRepository::new(StoreConfig { path });
            let err = repo.load().expect_err("corrupt");
            assert!(format!("{err:#}").contains("docs.json"));
        }
    }
}

pub use codec::{
    blocks_to_markdown, blocks_to_org, parse_markdown_content, parse_org_content,
};
pub use editor::Edit;
pub use navigator::navigate;
pub use visibility::is_visible;
