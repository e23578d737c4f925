//! Byte-level accessor over a tree of fixed-size leaves: `pread`/`pwrite`
//! addressed by `offset / LEAF_SIZE`, with copy-on-write on unaligned
//! partial writes and zero-filled holes on read. Thin; out of core scope
//! beyond the behavior stated here.

use crate::config::LEAF_SIZE;
use crate::tree::Tree;

type Block = Vec<u8>;

fn block_of(off: u64) -> u64 {
    off / LEAF_SIZE as u64
}

fn offset_in_block(off: u64) -> usize {
    (off % LEAF_SIZE as u64) as usize
}

/// Read `buf.len()` bytes starting at `off`. Bytes falling in leaves the
/// tree doesn't have are zero-filled.
pub fn pread(tree: &Tree<Block>, off: u64, buf: &mut [u8]) {
    let mut done = 0;
    while done < buf.len() {
        let abs = off + done as u64;
        let block_key = block_of(abs);
        let in_block = offset_in_block(abs);
        let want = (LEAF_SIZE - in_block).min(buf.len() - done);
        match tree.get(block_key) {
            Some(block) => {
                let avail = block.len().saturating_sub(in_block);
                let take = avail.min(want);
                buf[done..done + take].copy_from_slice(&block[in_block..in_block + take]);
                for b in &mut buf[done + take..done + want] {
                    *b = 0;
                }
            }
            None => {
                for b in &mut buf[done..done + want] {
                    *b = 0;
                }
            }
        }
        done += want;
    }
}

/// Write `data` starting at `off`. A write that does not cover a whole
/// leaf reads the existing block first (copy-on-write: the old block,
/// shared with other versions, is left untouched; a fresh block replaces
/// it in this tree).
pub fn pwrite(tree: &mut Tree<Block>, off: u64, data: &[u8]) {
    let mut done = 0;
    while done < data.len() {
        let abs = off + done as u64;
        let block_key = block_of(abs);
        let in_block = offset_in_block(abs);
        let want = (LEAF_SIZE - in_block).min(data.len() - done);

        let mut block = if want == LEAF_SIZE {
            vec![0u8; LEAF_SIZE]
        } else {
            tree.get(block_key).unwrap_or_else(|| vec![0u8; LEAF_SIZE])
        };
        if block.len() < LEAF_SIZE {
            block.resize(LEAF_SIZE, 0);
        }
        block[in_block..in_block + want].copy_from_slice(&data[done..done + want]);
        tree.insert(block_key, block);
        done += want;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back_across_block_boundary() {
        let mut t: Tree<Block> = Tree::create();
        let payload: Vec<u8> = (0..(LEAF_SIZE as u32 + 100)).map(|b| (b % 256) as u8).collect();
        pwrite(&mut t, 10, &payload);
        let mut out = vec![0u8; payload.len()];
        pread(&t, 10, &mut out);
        assert_eq!(out, payload);
    }

    #[test]
    fn unwritten_region_reads_as_zero() {
        let t: Tree<Block> = Tree::create();
        let mut out = vec![0xffu8; 16];
        pread(&t, 42, &mut out);
        assert_eq!(out, vec![0u8; 16]);
    }

    #[test]
    fn partial_write_preserves_rest_of_block() {
        let mut t: Tree<Block> = Tree::create();
        pwrite(&mut t, 0, &[1u8; LEAF_SIZE]);
        pwrite(&mut t, 4, &[9u8; 4]);
        let mut out = vec![0u8; LEAF_SIZE];
        pread(&t, 0, &mut out);
        assert_eq!(&out[0..4], &[1, 1, 1, 1]);
        assert_eq!(&out[4..8], &[9, 9, 9, 9]);
        assert_eq!(&out[8..], &vec![1u8; LEAF_SIZE - 8][..]);
    }
}
