//! # Table-Node Cursor
//!
//! [`PtIter`] visits the intermediate page-table frames of an address space in
//! depth-first, address order: every PDPT, PD and PT reachable from the root.
//! The root itself and the leaf frames are not reported.
//!
//! Reclaiming an address space is then two passes: free the leaves found with
//! [`VmIter`](crate::VmIter), free the nodes found here, free the root.

use crate::page_table::{ENTRIES, Level};
use crate::{AddressSpace, PhysMapper, PhysMapperExt};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// One intermediate page-table frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TableNode {
    /// Frame holding the table.
    pub page: PhysicalPage,
    /// Level of the table (never [`Level::L4`]).
    pub level: Level,
    /// First virtual address the table covers.
    pub va: VirtualAddress,
}

/// Depth-first cursor over intermediate table frames.
pub struct PtIter<'m, M: PhysMapper + ?Sized> {
    mem: &'m M,
    /// Tables being scanned, root first; `depth` indexes the innermost.
    tables: [PhysicalPage; 3],
    /// Next entry to look at in each scanned table.
    index: [usize; 3],
    /// First VA covered by each scanned table.
    base: [u64; 3],
    depth: usize,
    done: bool,
}

/// Level of the tables scanned at each depth, and of the tables they point to.
const SCANNED: [Level; 3] = [Level::L4, Level::L3, Level::L2];
const CHILDREN: [Level; 3] = [Level::L3, Level::L2, Level::L1];

impl<'m, M: PhysMapper + ?Sized> PtIter<'m, M> {
    pub fn new(mem: &'m M, space: AddressSpace) -> Self {
        let root = space.root_page();
        Self {
            mem,
            tables: [root; 3],
            index: [0; 3],
            base: [0; 3],
            depth: 0,
            done: false,
        }
    }
}

impl<M: PhysMapper + ?Sized> Iterator for PtIter<'_, M> {
    type Item = TableNode;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let d = self.depth;
            let i = self.index[d];
            if i >= ENTRIES {
                if d == 0 {
                    self.done = true;
                } else {
                    self.depth -= 1;
                    self.index[d - 1] += 1;
                }
                continue;
            }

            let level = SCANNED[d];
            let entry = self.mem.table(self.tables[d]).entry(i);
            if !entry.present() || entry.large_page() {
                self.index[d] += 1;
                continue;
            }

            let child_level = CHILDREN[d];
            let va = self.base[d] + i as u64 * level.span();
            let node = TableNode {
                page: entry.page(),
                level: child_level,
                va: VirtualAddress::new(va),
            };

            if child_level == Level::L1 {
                self.index[d] += 1;
            } else {
                self.depth += 1;
                self.tables[d + 1] = node.page;
                self.index[d + 1] = 0;
                self.base[d + 1] = va;
            }
            return Some(node);
        }
        None
    }
}
