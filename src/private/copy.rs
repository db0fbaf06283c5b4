// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License: see LICENSE file at the crate root.

//! Cross-message deep copy (spec.md §4.F "Copy semantics"). `setp` falls
//! back to this whenever the target of a pointer write does not already
//! live in the destination message (or lives there only as an
//! individually-unaddressable composite-list member).
//!
//! The walk dedupes against a [`CopyTree`] keyed by the source object's
//! `(segment, offset)`, so a DAG reachable through multiple paths in the
//! source is copied once and the destination pointers fan back out to the
//! same new object, and a cycle terminates instead of recursing forever.

use alloc::rc::Rc;
use alloc::vec;

use crate::message::{CopyTree, Message};
use crate::ptr::{self, Ptr, PtrType};
use crate::Result;

pub fn deep_copy(dest: &Rc<Message>, src: &Ptr) -> Result<Ptr> {
    let mut tree: CopyTree = CopyTree::new();
    copy_impl(dest, src, &mut tree)
}

fn copy_impl(dest: &Rc<Message>, src: &Ptr, tree: &mut CopyTree) -> Result<Ptr> {
    if src.is_null() {
        return Ok(Ptr::null(dest.clone()));
    }
    let (_, src_repr) = ptr::parts(src);
    let key = (src_repr.seg_id, src_repr.data_offset);
    if let Some(existing) = tree.get(&key) {
        return Ok(ptr::from_parts(dest.clone(), *existing));
    }

    match src.ptr_type() {
        PtrType::Struct => {
            let (_, repr) = ptr::parts(src);
            let data_words = (repr.datasz / 8) as u16;
            let ptr_words = repr.ptrsz;
            let new_struct = Ptr::new_struct(dest, data_words, ptr_words)?;
            tree.insert(key, *ptr::repr_of(&new_struct));
            copy_data_bytes(src, repr.data_offset, repr.datasz, &new_struct)?;
            for j in 0..ptr_words {
                let child = src.getp(j as u32);
                if !child.is_null() {
                    let copied = copy_impl(dest, &child, tree)?;
                    new_struct.setp(j as u32, &copied)?;
                }
            }
            Ok(new_struct)
        }
        PtrType::List if ptr::repr_of(src).has_composite_tag => {
            let (_, repr) = ptr::parts(src);
            let count = src.len();
            let data_words = (repr.datasz / 8) as u16;
            let ptr_words = repr.ptrsz;
            let new_list = Ptr::new_struct_list(dest, data_words, ptr_words, count)?;
            tree.insert(key, *ptr::repr_of(&new_list));
            for i in 0..count {
                let src_member = src.getp(i);
                let dst_member = new_list.getp(i);
                let member_repr = *ptr::repr_of(&src_member);
                copy_data_bytes(&src_member, member_repr.data_offset, member_repr.datasz, &dst_member)?;
                for j in 0..ptr_words {
                    let child = src_member.getp(j as u32);
                    if !child.is_null() {
                        let copied = copy_impl(dest, &child, tree)?;
                        dst_member.setp(j as u32, &copied)?;
                    }
                }
            }
            Ok(new_list)
        }
        PtrType::PtrList => {
            let count = src.len();
            let new_list = Ptr::new_ptr_list(dest, count)?;
            tree.insert(key, *ptr::repr_of(&new_list));
            for i in 0..count {
                let child = src.getp(i);
                if !child.is_null() {
                    let copied = copy_impl(dest, &child, tree)?;
                    new_list.setp(i, &copied)?;
                }
            }
            Ok(new_list)
        }
        PtrType::BitList => {
            let count = src.len();
            let new_list = Ptr::new_bit_list(dest, count)?;
            tree.insert(key, *ptr::repr_of(&new_list));
            let region_len = ptr::repr_of(src).data_region_len_bytes();
            copy_raw_region(src, region_len, &new_list)?;
            Ok(new_list)
        }
        PtrType::List => {
            let count = src.len();
            let element_size = ptr::repr_of(src).element_size;
            let new_list = Ptr::new_list(dest, element_size, count)?;
            tree.insert(key, *ptr::repr_of(&new_list));
            let region_len = ptr::repr_of(src).data_region_len_bytes();
            copy_raw_region(src, region_len, &new_list)?;
            Ok(new_list)
        }
        PtrType::Null => unreachable!("null handled above"),
    }
}

fn copy_bytes(
    src_msg: &Rc<Message>,
    src_seg: u32,
    src_off: u32,
    len: u32,
    dest_msg: &Rc<Message>,
    dest_seg: u32,
    dest_off: u32,
) {
    if len == 0 {
        return;
    }
    let mut buf = vec![0u8; len as usize];
    {
        let arena = src_msg.arena.borrow();
        if let Some(seg) = arena.segment(src_seg) {
            let data = seg.data_full();
            buf.copy_from_slice(&data[src_off as usize..src_off as usize + len as usize]);
        }
    }
    {
        let mut arena = dest_msg.arena.borrow_mut();
        if let Some(seg) = arena.segment_mut(dest_seg) {
            let data = seg.data_full_mut();
            data[dest_off as usize..dest_off as usize + len as usize].copy_from_slice(&buf);
        }
    }
}

fn copy_data_bytes(src: &Ptr, src_off: u32, len: u32, dest: &Ptr) -> Result<()> {
    let (src_msg, src_repr) = ptr::parts(src);
    let (dest_msg, dest_repr) = ptr::parts(dest);
    copy_bytes(src_msg, src_repr.seg_id, src_off, len, dest_msg, dest_repr.seg_id, dest_repr.data_offset);
    Ok(())
}

fn copy_raw_region(src: &Ptr, len: u32, dest: &Ptr) -> Result<()> {
    let (src_msg, src_repr) = ptr::parts(src);
    let (dest_msg, dest_repr) = ptr::parts(dest);
    copy_bytes(
        src_msg,
        src_repr.seg_id,
        src_repr.data_offset,
        len,
        dest_msg,
        dest_repr.seg_id,
        dest_repr.data_offset,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_message_struct_copy_is_independent() {
        let src_msg = Message::init_malloc();
        let src_root = src_msg.new_root(8, 1).unwrap();
        src_root.write64(0, 42).unwrap();
        let child = Ptr::new_struct(&src_msg, 8, 0).unwrap();
        child.write64(0, 7).unwrap();
        src_root.setp(0, &child).unwrap();

        let dest_msg = Message::init_malloc();
        let dest_root = dest_msg.new_root(8, 1).unwrap();
        dest_root.setp(0, &src_root).unwrap(); // cross-message: forces deep copy

        let copied_child = dest_root.getp(0);
        assert_eq!(copied_child.read64(0), 7);

        child.write64(0, 100).unwrap();
        assert_eq!(copied_child.read64(0), 7, "deep copy must not alias the source");
    }

    #[test]
    fn shared_child_copied_once_preserves_dag_shape() {
        let src_msg = Message::init_malloc();
        let root = src_msg.new_root(0, 2).unwrap();
        let shared = Ptr::new_struct(&src_msg, 8, 0).unwrap();
        shared.write64(0, 99).unwrap();
        root.setp(0, &shared).unwrap();
        root.setp(1, &shared).unwrap();

        let dest_msg = Message::init_malloc();
        let dest_root = dest_msg.new_root(0, 2).unwrap();
        dest_root.setp(0, &root).unwrap();

        let copied_root = dest_root.getp(0);
        let a = copied_root.getp(0);
        let b = copied_root.getp(1);
        a.write64(0, 5).unwrap();
        assert_eq!(b.read64(0), 5, "both slots must still point at the same copy");
    }
}
