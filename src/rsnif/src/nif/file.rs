
use log::debug;

use super::*;

/// Trailing root list: `u32 numRoots` followed by one raw reference per root.
///
/// The roots are ordinary block references and take part in every
/// reference-rewriting pass, so deleting or reordering blocks keeps them
/// pointing at the same payloads.
#[derive(Debug, Clone, Default)]
pub struct NifFooter {
    pub roots: Vec<NiRef>,
}

impl NifFooter {
    fn get(&mut self, stream: &mut NifStream) -> NifResult<()> {
        let num_roots = stream.read_u32()? as usize;
        self.roots.clear();
        self.roots.reserve(num_roots.min(1024));
        for _ in 0..num_roots {
            let mut root = NiRef::default();
            root.get(stream)?;
            self.roots.push(root);
        }
        Ok(())
    }

    fn put(&self, stream: &mut NifStream) -> NifResult<()> {
        stream.write_u32(self.roots.len() as u32)?;
        for root in self.roots.iter() {
            root.put(stream)?;
        }
        Ok(())
    }
}

/// A NIF container: the header, the block arena it describes, and the footer.
///
/// Block identity is ordinal. The arena exclusively owns every payload, and
/// all edges between payloads are indices, so the editor operations below can
/// move and drop blocks freely as long as they rewrite every enumerated
/// reference. Each instance is independent; nothing here is shared or
/// thread-safe across instances.
pub struct NifFile {
    pub header: NifHeader,
    blocks: Vec<Box<dyn NiBlock>>,
    pub footer: NifFooter,
}

impl NifFile {
    /// Empty graph for the given version.
    pub fn new(version: NifVersion) -> Self {
        NifFile {
            header: NifHeader::new(version),
            blocks: Vec::new(),
            footer: NifFooter::default(),
        }
    }

    /// Decodes a whole container: preamble, one payload per block row, then
    /// the footer. Block types resolve through the header's type table, or,
    /// before 5.0.0.1, through the type-name string preceding each payload.
    /// Unregistered types keep their bytes in a [`NiUnknown`] sized from the
    /// block size table.
    pub fn load(data: Vec<u8>, registry: &BlockRegistry) -> NifResult<NifFile> {
        let mut stream = NifStream::for_read(data);
        let mut header = NifHeader::default();
        header.get(&mut stream)?;
        if !header.is_valid() {
            return Err(NifError::BadSignature);
        }

        let mut blocks: Vec<Box<dyn NiBlock>> = Vec::with_capacity(header.num_blocks() as usize);
        for block_id in 0..header.num_blocks() {
            let type_name = if header.has_block_types() {
                header
                    .block_type_name(block_id)
                    .ok_or_else(|| {
                        NifError::InvariantViolated(format!(
                            "block {} has no entry in the type table",
                            block_id
                        ))
                    })?
                    .to_string()
            } else {
                // Headers before 5.0.0.1 have no type table; the name sits
                // in front of each payload instead. Register it so the
                // in-memory tables stay populated for every version.
                let type_name = NiString::read(&mut stream, 4)?.into_string();
                header.register_loaded_block_type(&type_name);
                type_name
            };

            let mut block: Box<dyn NiBlock> = match registry.create(&type_name) {
                Some(block) => block,
                None => {
                    let Some(size) = header.block_size(block_id) else {
                        return Err(NifError::UnknownBlockType(type_name));
                    };
                    debug!(
                        "no constructor for block type `{}`, keeping {} bytes raw",
                        type_name, size
                    );
                    Box::new(NiUnknown::new(type_name, size as usize))
                }
            };
            block.get(&mut stream)?;
            blocks.push(block);
        }

        let mut footer = NifFooter::default();
        footer.get(&mut stream)?;

        let mut file = NifFile {
            header,
            blocks,
            footer,
        };
        file.fill_string_refs();
        Ok(file)
    }

    /// Encodes the container back to bytes. The string pool is rebuilt from
    /// the live string references, the preamble reserves the block size
    /// table, each payload is measured as it serializes, and the table is
    /// patched in place afterwards.
    pub fn save(&mut self) -> NifResult<Vec<u8>> {
        let has_unknown = self.has_unknown();
        self.update_header_strings(has_unknown);

        let mut stream = NifStream::for_write(self.header.version);
        self.header.put(&mut stream)?;

        for block_id in 0..self.blocks.len() {
            if !self.header.has_block_types() {
                NiString::new(self.blocks[block_id].block_name()).put(&mut stream, 4, false)?;
            }
            let start = stream.pos();
            self.blocks[block_id].put(&mut stream)?;
            let written = (stream.pos() - start) as u32;
            self.header.set_block_size(block_id, written);
        }

        if self.header.has_block_sizes() {
            let end = stream.pos();
            self.header.patch_block_sizes(&mut stream)?;
            stream.seek(end)?;
        }

        self.footer.put(&mut stream)?;
        Ok(stream.into_bytes())
    }

    pub fn num_blocks(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn block(&self, block_id: u32) -> Option<&dyn NiBlock> {
        self.blocks.get(block_id as usize).map(|b| b.as_ref())
    }

    pub fn block_mut(&mut self, block_id: u32) -> Option<&mut (dyn NiBlock + 'static)> {
        self.blocks.get_mut(block_id as usize).map(|b| b.as_mut())
    }

    /// True when any payload is the verbatim fallback; its opaque bytes may
    /// hold string indices this layer cannot rewrite, so the pool is then
    /// only ever appended to.
    pub fn has_unknown(&self) -> bool {
        self.blocks.iter().any(|b| b.is_unknown())
    }

    /// Appends a payload and its bookkeeping rows; returns the new ordinal.
    /// The payload may reference ordinals that do not exist yet, so graphs
    /// can be built in any order.
    pub fn add_block(&mut self, block: Box<dyn NiBlock>) -> u32 {
        let type_name = block.block_name().to_string();
        let block_id = self.header.add_block_info(&type_name);
        self.blocks.push(block);
        block_id
    }

    /// Removes a block and compacts every ordinal behind it. References to
    /// the removed block become null; references past it shift down by one.
    /// `NIF_NPOS` and out-of-range ordinals are ignored.
    pub fn delete_block(&mut self, block_id: u32) {
        if block_id == NIF_NPOS || block_id as usize >= self.blocks.len() {
            return;
        }
        self.header.delete_block_info(block_id);
        self.blocks.remove(block_id as usize);
        self.for_each_ref_index(|index| {
            if *index == block_id {
                *index = NIF_NPOS;
            } else if *index != NIF_NPOS && *index > block_id {
                *index -= 1;
            }
        });
        debug_assert!(self.validate().is_ok());
    }

    /// Removes every block of the named type, walking ordinals downwards so
    /// the remaining collected ids stay valid. With `orphaned_only`, blocks
    /// that are still referenced survive.
    pub fn delete_blocks_by_type(&mut self, type_name: &str, orphaned_only: bool) {
        let Some(type_id) = self.header.find_block_type_id(type_name) else {
            return;
        };
        let ids: Vec<u32> = self
            .header
            .block_type_indices()
            .iter()
            .enumerate()
            .filter(|&(_, &ty)| ty == type_id)
            .map(|(block_id, _)| block_id as u32)
            .collect();
        for &block_id in ids.iter().rev() {
            if orphaned_only && self.is_block_referenced(block_id, true) {
                continue;
            }
            self.delete_block(block_id);
        }
    }

    /// Swaps the payload at an ordinal for a new one. Ordinals and every
    /// existing reference stay valid; only the type tables adjust.
    pub fn replace_block(&mut self, block_id: u32, block: Box<dyn NiBlock>) {
        let index = block_id as usize;
        if index >= self.blocks.len() {
            return;
        }
        self.header.replace_block_info(block_id, block.block_name());
        self.blocks[index] = block;
        debug_assert!(self.validate().is_ok());
    }

    /// Moves every block so the one at ordinal `i` ends up at
    /// `new_order[i]`, then rewrites all in-range reference indices through
    /// the same permutation. Anything other than a complete permutation of
    /// the current ordinals is a no-op.
    pub fn set_block_order(&mut self, new_order: &[u32]) {
        let count = self.blocks.len();
        if new_order.len() != count {
            return;
        }
        let mut seen = vec![false; count];
        for &target in new_order {
            let Some(slot) = seen.get_mut(target as usize) else {
                return;
            };
            if *slot {
                return;
            }
            *slot = true;
        }

        self.header.reorder_block_info(new_order);

        let mut moved: Vec<Option<Box<dyn NiBlock>>> = (0..count).map(|_| None).collect();
        for (from, block) in self.blocks.drain(..).enumerate() {
            moved[new_order[from] as usize] = Some(block);
        }
        self.blocks = moved.into_iter().flatten().collect();

        self.for_each_ref_index(|index| {
            if *index != NIF_NPOS && (*index as usize) < new_order.len() {
                *index = new_order[*index as usize];
            }
        });
        debug_assert!(self.validate().is_ok());
    }

    /// Exchanges the ordinals of two blocks, rewriting references both ways.
    pub fn swap_blocks(&mut self, first: u32, second: u32) {
        let count = self.blocks.len() as u32;
        if first >= count || second >= count || first == second {
            return;
        }
        let order: Vec<u32> = (0..count)
            .map(|block_id| {
                if block_id == first {
                    second
                } else if block_id == second {
                    first
                } else {
                    block_id
                }
            })
            .collect();
        self.set_block_order(&order);
    }

    /// Drops every block that nothing reaches: no child edge, no back
    /// pointer, no footer root. Cascades until the graph is stable and
    /// returns how many blocks went away.
    pub fn delete_unreferenced_blocks(&mut self) -> usize {
        let mut deleted = 0;
        loop {
            let num_blocks = self.num_blocks();
            let mut victim = None;
            for block_id in 0..num_blocks {
                if self
                    .footer
                    .roots
                    .iter()
                    .any(|root| root.index == block_id)
                {
                    continue;
                }
                if !self.is_block_referenced(block_id, true) {
                    victim = Some(block_id);
                    break;
                }
            }
            let Some(block_id) = victim else {
                break;
            };
            self.delete_block(block_id);
            deleted += 1;
        }
        deleted
    }

    /// Occurrences of the ordinal among every block's child references, and
    /// among the back-pointers too when `include_ptrs` is set.
    pub fn block_ref_count(&mut self, block_id: u32, include_ptrs: bool) -> usize {
        let mut count = 0;
        for block in self.blocks.iter_mut() {
            for child in block.child_refs() {
                if child.index == block_id {
                    count += 1;
                }
            }
            if include_ptrs {
                for back in block.ptr_refs() {
                    if back.index == block_id {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    pub fn is_block_referenced(&mut self, block_id: u32, include_ptrs: bool) -> bool {
        self.block_ref_count(block_id, include_ptrs) > 0
    }

    /// Ordinal of a payload by identity, `NIF_NPOS` when it is not in the
    /// arena.
    pub fn block_id(&self, block: &dyn NiBlock) -> u32 {
        let target = block as *const dyn NiBlock as *const ();
        for (block_id, candidate) in self.blocks.iter().enumerate() {
            if candidate.as_ref() as *const dyn NiBlock as *const () == target {
                return block_id as u32;
            }
        }
        NIF_NPOS
    }

    /// Resolves every string reference against the central pool after a
    /// load. Indices at or past the pool length are first folded back by the
    /// pool length; files in the wild carry such offsets, so the fold is
    /// reproduced as-is.
    pub fn fill_string_refs(&mut self) {
        if !self.header.has_string_pool() {
            return;
        }
        let num_strings = self.header.num_strings();
        for block in self.blocks.iter_mut() {
            for string_ref in block.string_refs() {
                let mut index = string_ref.index();
                if index == NIF_NPOS {
                    continue;
                }
                if index >= num_strings {
                    index -= num_strings;
                    string_ref.set_index(index);
                }
                if let Some(value) = self.header.string(index) {
                    string_ref.set(value);
                }
            }
        }
    }

    /// Rebuilds the central pool from the live string references before a
    /// write. The pool is cleared first unless opaque payloads may still
    /// hold indices into it. References that currently carry a pool index
    /// keep their (possibly empty) value in the pool; unresolved empty
    /// references stay null.
    pub fn update_header_strings(&mut self, has_unknown: bool) {
        if !self.header.has_string_pool() {
            return;
        }
        if !has_unknown {
            self.header.clear_strings();
        }
        for block in self.blocks.iter_mut() {
            for string_ref in block.string_refs() {
                let add_empty = string_ref.index() != NIF_NPOS;
                let index = self.header.add_or_find_string_id(string_ref.get(), add_empty);
                string_ref.set_index(index);
            }
        }
        self.header.update_max_string_len();
    }

    fn for_each_ref_index<F: FnMut(&mut u32)>(&mut self, mut apply: F) {
        for block in self.blocks.iter_mut() {
            for child in block.child_refs() {
                apply(&mut child.index);
            }
            for back in block.ptr_refs() {
                apply(&mut back.index);
            }
        }
        for root in self.footer.roots.iter_mut() {
            apply(&mut root.index);
        }
    }

    /// Checks that the header tables, the block arena, the references and
    /// the string pool are still in step, reporting the first mismatch.
    pub fn validate(&mut self) -> NifResult<()> {
        let num_blocks = self.blocks.len() as u32;
        if self.header.num_blocks() != num_blocks {
            return Err(NifError::InvariantViolated(format!(
                "header counts {} blocks, arena holds {}",
                self.header.num_blocks(),
                num_blocks
            )));
        }
        if self.header.block_type_indices().len() as u32 != num_blocks {
            return Err(NifError::InvariantViolated(
                "type index table length differs from the block count".to_string(),
            ));
        }
        if self.header.has_block_sizes() && self.header.block_sizes().len() as u32 != num_blocks {
            return Err(NifError::InvariantViolated(
                "size table length differs from the block count".to_string(),
            ));
        }

        let num_block_types = self.header.num_block_types();
        if self.header.block_types().len() as u32 != num_block_types {
            return Err(NifError::InvariantViolated(
                "type registry length differs from its counter".to_string(),
            ));
        }
        for (block_id, &type_id) in self.header.block_type_indices().iter().enumerate() {
            if u32::from(type_id) >= num_block_types {
                return Err(NifError::InvariantViolated(format!(
                    "block {} names type {} of {}",
                    block_id, type_id, num_block_types
                )));
            }
        }
        for (type_id, name) in self.header.block_types().iter().enumerate() {
            let used = self
                .header
                .block_type_indices()
                .iter()
                .any(|&ty| usize::from(ty) == type_id);
            if !used {
                return Err(NifError::InvariantViolated(format!(
                    "type `{}` has no remaining blocks",
                    name
                )));
            }
        }

        let num_strings = self.header.num_strings();
        if self.header.strings().len() as u32 != num_strings {
            return Err(NifError::InvariantViolated(
                "string pool length differs from its counter".to_string(),
            ));
        }
        let max_string_len = self.header.max_string_len();
        let pool_max = self
            .header
            .strings()
            .iter()
            .map(|s| s.len() as u32)
            .max()
            .unwrap_or(0);
        if self.header.has_string_pool() && pool_max != max_string_len {
            return Err(NifError::InvariantViolated(format!(
                "max string length {} but the longest pool entry is {}",
                max_string_len, pool_max
            )));
        }

        let has_string_pool = self.header.has_string_pool();
        let mut failure: Option<String> = None;
        let header = &self.header;
        for (block_id, block) in self.blocks.iter_mut().enumerate() {
            for child in block.child_refs() {
                if child.index != NIF_NPOS && child.index >= num_blocks {
                    failure = Some(format!(
                        "block {} holds a child reference to {}",
                        block_id, child.index
                    ));
                }
            }
            for back in block.ptr_refs() {
                if back.index != NIF_NPOS && back.index >= num_blocks {
                    failure = Some(format!(
                        "block {} holds a back-pointer to {}",
                        block_id, back.index
                    ));
                }
            }
            if has_string_pool {
                for string_ref in block.string_refs() {
                    let index = string_ref.index();
                    if index == NIF_NPOS {
                        continue;
                    }
                    if index >= num_strings {
                        failure = Some(format!(
                            "block {} holds string index {} of {}",
                            block_id, index, num_strings
                        ));
                    } else if header.string(index) != Some(string_ref.get()) {
                        failure = Some(format!(
                            "block {} caches a stale value for string {}",
                            block_id, index
                        ));
                    }
                }
            }
            if failure.is_some() {
                break;
            }
        }
        if let Some(message) = failure {
            return Err(NifError::InvariantViolated(message));
        }
        for root in self.footer.roots.iter() {
            if root.index != NIF_NPOS && root.index >= num_blocks {
                return Err(NifError::InvariantViolated(format!(
                    "footer root points at {}",
                    root.index
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestNode {
        name: NiStringRef,
        children: Vec<NiRef>,
        controller: NiPtr,
    }

    impl TestNode {
        fn named(name: &str) -> Self {
            let mut node = TestNode::default();
            node.name.set(name);
            node
        }
    }

    impl NiBlock for TestNode {
        fn block_name(&self) -> &str {
            "NiNode"
        }

        fn get(&mut self, stream: &mut NifStream) -> NifResult<()> {
            self.name.read(stream)?;
            let num_children = stream.read_u32()? as usize;
            self.children = vec![NiRef::default(); num_children];
            for child in self.children.iter_mut() {
                child.get(stream)?;
            }
            self.controller.get(stream)
        }

        fn put(&self, stream: &mut NifStream) -> NifResult<()> {
            self.name.write(stream)?;
            stream.write_u32(self.children.len() as u32)?;
            for child in self.children.iter() {
                child.put(stream)?;
            }
            self.controller.put(stream)
        }

        fn child_refs(&mut self) -> Vec<&mut NiRef> {
            self.children.iter_mut().collect()
        }

        fn ptr_refs(&mut self) -> Vec<&mut NiPtr> {
            vec![&mut self.controller]
        }

        fn string_refs(&mut self) -> Vec<&mut NiStringRef> {
            vec![&mut self.name]
        }
    }

    #[derive(Default)]
    struct TestShape {
        vertex_count: u32,
    }

    impl NiBlock for TestShape {
        fn block_name(&self) -> &str {
            "NiTriShape"
        }

        fn get(&mut self, stream: &mut NifStream) -> NifResult<()> {
            self.vertex_count = stream.read_u32()?;
            Ok(())
        }

        fn put(&self, stream: &mut NifStream) -> NifResult<()> {
            stream.write_u32(self.vertex_count)
        }
    }

    fn registry() -> BlockRegistry {
        let mut registry = BlockRegistry::new();
        registry.register("NiNode", || Box::new(TestNode::default()));
        registry.register("NiTriShape", || Box::new(TestShape::default()));
        registry
    }

    fn child_indices(file: &mut NifFile, block_id: u32) -> Vec<u32> {
        file.block_mut(block_id)
            .unwrap()
            .child_refs()
            .iter()
            .map(|child| child.index)
            .collect()
    }

    fn name_of(file: &mut NifFile, block_id: u32) -> String {
        file.block_mut(block_id)
            .unwrap()
            .string_refs()
            .first()
            .map(|name| name.get().to_string())
            .unwrap_or_default()
    }

    #[test]
    fn bethesda_save_load_save_is_byte_identical() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 12, 83));
        file.header.set_creator("rsnif");
        file.header.set_export_info("scene export", "", "");
        let root = file.add_block(Box::new(TestNode::named("Scene Root")));
        file.footer.roots.push(NiRef::new(root));

        let bytes = file.save().unwrap();
        let mut reloaded = NifFile::load(bytes.clone(), &registry()).unwrap();
        assert_eq!(reloaded.header.creator(), "rsnif");
        assert_eq!(reloaded.save().unwrap(), bytes);
    }

    #[test]
    fn save_load_save_identity_across_versions() {
        let versions = [
            (V3_1, 0, 0),
            (V4_0_0_2, 0, 0),
            (V10_2_0_0, 0, 0),
            (V20_0_0_5, 11, 11),
            (V20_1_0_3, 0, 0),
            (V20_2_0_7, 12, 83),
        ];
        for (file_ver, user, stream_ver) in versions {
            let mut file = NifFile::new(NifVersion::new(file_ver, user, stream_ver));
            let leaf = file.add_block(Box::new(TestNode::named("leaf")));
            let mut root = TestNode::named("root");
            root.children.push(NiRef::new(leaf));
            root.controller = NiPtr::new(leaf);
            let root_id = file.add_block(Box::new(root));
            let mut shape = TestShape::default();
            shape.vertex_count = 42;
            file.add_block(Box::new(shape));
            file.footer.roots.push(NiRef::new(root_id));

            let bytes = file.save().unwrap();
            let mut reloaded = NifFile::load(bytes.clone(), &registry()).unwrap();
            assert_eq!(
                reloaded.save().unwrap(),
                bytes,
                "identity failed at 0x{:08X}",
                file_ver
            );
        }
    }

    #[test]
    fn delete_nulls_references_to_the_victim() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        let a = file.add_block(Box::new(TestNode::named("A")));
        let mut b = TestNode::named("B");
        b.children.push(NiRef::new(a));
        file.add_block(Box::new(b));

        file.delete_block(a);

        assert_eq!(file.num_blocks(), 1);
        assert_eq!(file.header.num_block_types(), 1);
        assert_eq!(child_indices(&mut file, 0), [NIF_NPOS]);
        assert!(file.validate().is_ok());
    }

    #[test]
    fn deleting_the_last_user_of_a_type_drops_it() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        file.add_block(Box::new(TestNode::named("A")));
        let shape = file.add_block(Box::new(TestShape::default()));
        assert_eq!(file.header.block_types(), ["NiNode", "NiTriShape"]);

        file.delete_block(shape);

        assert_eq!(file.header.block_types(), ["NiNode"]);
        assert_eq!(file.header.block_type_indices(), [0]);
    }

    #[test]
    fn delete_shifts_references_past_the_victim() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        file.add_block(Box::new(TestNode::named("A")));
        file.add_block(Box::new(TestNode::named("B")));
        let mut c = TestNode::named("C");
        c.children.push(NiRef::new(2));
        let mut holder = TestNode::named("holder");
        holder.children.push(NiRef::new(1));
        file.add_block(Box::new(c));
        file.add_block(Box::new(holder));
        // holder at 3 references B at 1; C at 2 references itself at 2.

        file.delete_block(0);

        assert_eq!(child_indices(&mut file, 1), [1]);
        assert_eq!(child_indices(&mut file, 2), [0]);
        assert!(file.validate().is_ok());
    }

    #[test]
    fn delete_by_type_in_descending_order() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        file.add_block(Box::new(TestShape::default()));
        file.add_block(Box::new(TestNode::named("keep")));
        file.add_block(Box::new(TestShape::default()));

        file.delete_blocks_by_type("NiTriShape", false);

        assert_eq!(file.num_blocks(), 1);
        assert_eq!(file.header.block_types(), ["NiNode"]);
        assert_eq!(name_of(&mut file, 0), "keep");
    }

    #[test]
    fn delete_by_type_keeps_referenced_blocks_when_orphaned_only() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        let referenced = file.add_block(Box::new(TestShape::default()));
        file.add_block(Box::new(TestShape::default()));
        let mut node = TestNode::named("owner");
        node.children.push(NiRef::new(referenced));
        file.add_block(Box::new(node));

        file.delete_blocks_by_type("NiTriShape", true);

        assert_eq!(file.num_blocks(), 2);
        assert_eq!(child_indices(&mut file, 1), [0]);
        assert!(file.validate().is_ok());
    }

    #[test]
    fn replace_block_keeps_ordinals_stable() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        let target = file.add_block(Box::new(TestShape::default()));
        let mut node = TestNode::named("owner");
        node.children.push(NiRef::new(target));
        file.add_block(Box::new(node));

        file.replace_block(target, Box::new(TestNode::named("replacement")));

        assert_eq!(file.header.block_types(), ["NiNode"]);
        assert_eq!(file.header.block_type_indices(), [0, 0]);
        assert_eq!(child_indices(&mut file, 1), [target]);
        assert_eq!(name_of(&mut file, target), "replacement");
    }

    #[test]
    fn reorder_rewrites_references_through_the_permutation() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        let a = file.add_block(Box::new(TestNode::named("A")));
        let mut b = TestNode::named("B");
        b.children.push(NiRef::new(a));
        let b_id = file.add_block(Box::new(b));
        let mut c = TestNode::named("C");
        c.children.push(NiRef::new(b_id));
        file.add_block(Box::new(c));
        file.footer.roots.push(NiRef::new(a));

        file.set_block_order(&[2, 0, 1]);

        assert_eq!(name_of(&mut file, 0), "B");
        assert_eq!(name_of(&mut file, 1), "C");
        assert_eq!(name_of(&mut file, 2), "A");
        assert_eq!(child_indices(&mut file, 0), [2]);
        assert_eq!(child_indices(&mut file, 1), [0]);
        assert_eq!(file.footer.roots[0].index, 2);
        assert!(file.validate().is_ok());
    }

    #[test]
    fn reorder_rejects_non_permutations() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        file.add_block(Box::new(TestNode::named("A")));
        file.add_block(Box::new(TestNode::named("B")));

        file.set_block_order(&[0]);
        file.set_block_order(&[1, 1]);
        file.set_block_order(&[0, 5]);

        assert_eq!(name_of(&mut file, 0), "A");
        assert_eq!(name_of(&mut file, 1), "B");
    }

    #[test]
    fn swap_exchanges_two_ordinals() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        let a = file.add_block(Box::new(TestNode::named("A")));
        let mut b = TestNode::named("B");
        b.children.push(NiRef::new(a));
        file.add_block(Box::new(b));
        file.add_block(Box::new(TestNode::named("C")));

        file.swap_blocks(0, 2);

        assert_eq!(name_of(&mut file, 0), "C");
        assert_eq!(name_of(&mut file, 2), "A");
        assert_eq!(child_indices(&mut file, 1), [2]);
        assert!(file.validate().is_ok());
    }

    #[test]
    fn unreferenced_blocks_are_swept_transitively() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        let leaf = file.add_block(Box::new(TestNode::named("leaf")));
        let mut limb = TestNode::named("limb");
        limb.children.push(NiRef::new(leaf));
        file.add_block(Box::new(limb));
        let root = file.add_block(Box::new(TestNode::named("root")));
        file.footer.roots.push(NiRef::new(root));

        // limb owns leaf, but nothing owns limb; both must go.
        let deleted = file.delete_unreferenced_blocks();

        assert_eq!(deleted, 2);
        assert_eq!(file.num_blocks(), 1);
        assert_eq!(name_of(&mut file, 0), "root");
        assert_eq!(file.footer.roots[0].index, 0);
        assert!(file.validate().is_ok());
    }

    #[test]
    fn big_endian_container_round_trips() {
        let mut file = NifFile::new(NifVersion::new(V20_0_0_5, 0, 0));
        file.header.set_endian(NifEndian::Big);
        let leaf = file.add_block(Box::new(TestNode::named("leaf")));
        let mut shape = TestShape::default();
        shape.vertex_count = 0x0102_0304;
        file.add_block(Box::new(shape));
        file.footer.roots.push(NiRef::new(leaf));

        let bytes = file.save().unwrap();
        let mut reloaded = NifFile::load(bytes.clone(), &registry()).unwrap();
        assert_eq!(reloaded.header.endian(), NifEndian::Big);
        assert_eq!(reloaded.save().unwrap(), bytes);
    }

    #[test]
    fn ref_counts_distinguish_children_from_pointers() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        let target = file.add_block(Box::new(TestNode::named("target")));
        let mut holder = TestNode::named("holder");
        holder.children.push(NiRef::new(target));
        holder.controller = NiPtr::new(target);
        file.add_block(Box::new(holder));

        assert_eq!(file.block_ref_count(target, false), 1);
        assert_eq!(file.block_ref_count(target, true), 2);
        assert!(file.is_block_referenced(target, false));
    }

    #[test]
    fn block_id_scans_by_identity() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        file.add_block(Box::new(TestNode::named("A")));
        file.add_block(Box::new(TestNode::named("B")));

        // Identity, not equality: an equal-looking payload outside the arena
        // resolves to the null ordinal.
        let outsider = TestNode::named("B");
        assert_eq!(file.block_id(file.block(1).unwrap()), 1);
        assert_eq!(file.block_id(&outsider), NIF_NPOS);
    }

    #[test]
    fn string_pool_rebuild_with_empty_policy() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        for name in ["alpha", "", "alpha", "beta"] {
            file.add_block(Box::new(TestNode::named(name)));
        }

        file.update_header_strings(false);

        assert_eq!(file.header.strings(), ["alpha", "beta"]);
        let indices: Vec<u32> = (0..4)
            .map(|block_id| {
                file.block_mut(block_id)
                    .unwrap()
                    .string_refs()[0]
                    .index()
            })
            .collect();
        assert_eq!(indices, [0, NIF_NPOS, 0, 1]);
        assert_eq!(file.header.max_string_len(), 5);
    }

    #[test]
    fn string_pool_rebuild_is_idempotent() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        for name in ["alpha", "beta", "alpha", ""] {
            file.add_block(Box::new(TestNode::named(name)));
        }

        file.update_header_strings(false);
        let pool: Vec<String> = file.header.strings().to_vec();
        let indices: Vec<u32> = (0..4)
            .map(|block_id| file.block_mut(block_id).unwrap().string_refs()[0].index())
            .collect();

        file.update_header_strings(false);
        assert_eq!(file.header.strings(), &pool[..]);
        let again: Vec<u32> = (0..4)
            .map(|block_id| file.block_mut(block_id).unwrap().string_refs()[0].index())
            .collect();
        assert_eq!(again, indices);
    }

    #[test]
    fn fill_string_refs_folds_legacy_overflow_indices() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        let mut node = TestNode::default();
        node.name.set_index(3); // two strings in the pool: folds to 1
        file.add_block(Box::new(node));
        file.header.add_or_find_string_id("first", false);
        file.header.add_or_find_string_id("second", false);

        file.fill_string_refs();

        let block = file.block_mut(0).unwrap();
        let refs = block.string_refs();
        assert_eq!(refs[0].index(), 1);
        assert_eq!(refs[0].get(), "second");
    }

    #[test]
    fn unknown_block_payload_round_trips_byte_identical() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        let payload = vec![9, 8, 7, 6, 5];
        file.add_block(Box::new(NiUnknown::with_data("BSCustomKindOfData", payload.clone())));

        let bytes = file.save().unwrap();
        let mut reloaded = NifFile::load(bytes.clone(), &BlockRegistry::new()).unwrap();
        assert!(reloaded.has_unknown());
        assert_eq!(reloaded.block(0).unwrap().block_name(), "BSCustomKindOfData");
        assert_eq!(reloaded.save().unwrap(), bytes);
    }

    #[test]
    fn unknown_block_without_a_size_table_fails_to_load() {
        // 20.1.0.3 headers predate the block size table.
        let mut file = NifFile::new(NifVersion::new(V20_1_0_3, 0, 0));
        file.add_block(Box::new(NiUnknown::with_data("BSCustomKindOfData", vec![1, 2])));
        let bytes = file.save().unwrap();

        assert!(matches!(
            NifFile::load(bytes, &BlockRegistry::new()),
            Err(NifError::UnknownBlockType(_))
        ));
    }

    #[test]
    fn load_rejects_unrecognized_signatures() {
        let mut stream = NifStream::for_write(NifVersion::default());
        stream.writeline("Definitely Not A Scene File").unwrap();
        assert!(matches!(
            NifFile::load(stream.into_bytes(), &BlockRegistry::new()),
            Err(NifError::BadSignature)
        ));
    }

    #[test]
    fn truncated_files_report_truncation() {
        let mut file = NifFile::new(NifVersion::new(V20_2_0_7, 0, 0));
        file.add_block(Box::new(TestNode::named("root")));
        let mut bytes = file.save().unwrap();
        bytes.truncate(bytes.len() - 6);

        assert!(matches!(
            NifFile::load(bytes, &registry()),
            Err(NifError::Truncated)
        ));
    }
}
