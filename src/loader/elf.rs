//! ELF32 executable loading.
//!
//! Only statically linked `ET_EXEC` images are honored: no dynamic
//! segments, no relocations. Loadable segments are mapped page by page into
//! the target address space and populated through the physical window, so
//! the target space does not need to be the hardware-active one during the
//! load.

use bitflags::bitflags;
use log::debug;

use crate::error::KernelError;
use crate::memory::address_space::AddressSpace;
use crate::memory::paging::PteFlags;
use crate::memory::pmm::FrameBitmap;
use crate::memory::{align_down, align_up, PhysWindow, VirtAddr, PAGE_SIZE};
use crate::arch::HardwareOps;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const EI_CLASS_32: u8 = 1;
const EI_DATA_LE: u8 = 1;
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;

bitflags! {
    /// Program-header `p_flags` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = 0x1;
        const WRITE   = 0x2;
        const READ    = 0x4;
    }
}

/// The header fields the loader actually consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Header {
    pub entry: u32,
    pub ph_offset: u32,
    pub ph_entry_size: u16,
    pub ph_count: u16,
}

#[derive(Debug, Clone, Copy)]
struct ProgramHeader {
    kind: u32,
    offset: u32,
    vaddr: u32,
    file_size: u32,
    mem_size: u32,
    flags: SegmentFlags,
}

fn u16_at(image: &[u8], off: usize) -> Result<u16, KernelError> {
    let bytes = image
        .get(off..off + 2)
        .ok_or(KernelError::InvalidImage)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn u32_at(image: &[u8], off: usize) -> Result<u32, KernelError> {
    let bytes = image
        .get(off..off + 4)
        .ok_or(KernelError::InvalidImage)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Check the identification bytes and executable type; everything else is
/// the loader's problem.
pub fn validate(image: &[u8]) -> Result<Elf32Header, KernelError> {
    if image.len() < 52 || image[0..4] != ELF_MAGIC {
        return Err(KernelError::InvalidImage);
    }
    if image[4] != EI_CLASS_32 || image[5] != EI_DATA_LE {
        return Err(KernelError::InvalidImage);
    }
    if u16_at(image, 16)? != ET_EXEC {
        return Err(KernelError::InvalidImage);
    }
    Ok(Elf32Header {
        entry: u32_at(image, 24)?,
        ph_offset: u32_at(image, 28)?,
        ph_entry_size: u16_at(image, 42)?,
        ph_count: u16_at(image, 44)?,
    })
}

fn program_header(image: &[u8], header: &Elf32Header, index: u16) -> Result<ProgramHeader, KernelError> {
    let base = header.ph_offset as usize + index as usize * header.ph_entry_size as usize;
    Ok(ProgramHeader {
        kind: u32_at(image, base)?,
        offset: u32_at(image, base + 4)?,
        vaddr: u32_at(image, base + 8)?,
        file_size: u32_at(image, base + 16)?,
        mem_size: u32_at(image, base + 20)?,
        flags: SegmentFlags::from_bits_truncate(u32_at(image, base + 24)?),
    })
}

/// Map every loadable segment of `image` into `space` and return the entry
/// point.
///
/// Each page of the page-aligned cover of `[vaddr, vaddr + mem_size)` gets
/// a fresh physical page, mapped user-accessible, writable iff the segment
/// is writable. `file_size` bytes are copied in and the rest of the cover
/// is zeroed. On failure, pages and tables mapped so far stay where they
/// are — there is no rollback; the caller abandons the space.
pub fn load(
    image: &[u8],
    space: &mut AddressSpace,
    pmm: &mut FrameBitmap,
    window: &PhysWindow,
    hw: &mut dyn HardwareOps,
) -> Result<VirtAddr, KernelError> {
    let header = validate(image)?;

    for index in 0..header.ph_count {
        let segment = program_header(image, &header, index)?;
        if segment.kind != PT_LOAD || segment.mem_size == 0 {
            continue;
        }
        if segment.file_size > segment.mem_size {
            return Err(KernelError::InvalidImage);
        }
        let file_end = segment
            .offset
            .checked_add(segment.file_size)
            .ok_or(KernelError::InvalidImage)?;
        if file_end as usize > image.len() {
            return Err(KernelError::InvalidImage);
        }

        let start = align_down(segment.vaddr, PAGE_SIZE);
        let end = align_up(
            segment
                .vaddr
                .checked_add(segment.mem_size)
                .ok_or(KernelError::InvalidImage)?,
            PAGE_SIZE,
        );

        let mut flags = PteFlags::USER;
        if segment.flags.contains(SegmentFlags::WRITE) {
            flags |= PteFlags::WRITABLE;
        }

        let mut page = start;
        while page < end {
            let frame = pmm.alloc_page()?;
            space.map_page(pmm, window, hw, frame, VirtAddr::new(page), flags)?;
            page += PAGE_SIZE;
        }

        // Fresh frames carry stale contents: clear the whole cover, then
        // copy the file payload over it.
        space.zero_range(window, VirtAddr::new(start), (end - start) as usize)?;
        space.write_bytes(
            window,
            VirtAddr::new(segment.vaddr),
            &image[segment.offset as usize..file_end as usize],
        )?;

        debug!(
            "loader: segment {:#x}..{:#x} filesz {} flags {:?}",
            segment.vaddr,
            segment.vaddr + segment.mem_size,
            segment.file_size,
            segment.flags
        );
    }

    Ok(VirtAddr::new(header.entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, RecordingHardware, SegmentSpec};

    fn fixture() -> (testutil::Arena, PhysWindow, FrameBitmap) {
        let (arena, window) = testutil::arena(128);
        let pmm = FrameBitmap::init(&window, 128 * 4096, 4096);
        (arena, window, pmm)
    }

    #[test]
    fn rejects_bad_magic_and_type() {
        assert_eq!(validate(b"not an elf"), Err(KernelError::InvalidImage));

        let image = testutil::build_elf(
            0x1000,
            &[SegmentSpec {
                vaddr: 0x1000,
                file_bytes: &[0xc3],
                mem_size: 0x10,
                writable: false,
            }],
        );
        // Flip the type field to ET_DYN.
        let mut dynamic = image.clone();
        dynamic[16] = 3;
        assert_eq!(validate(&dynamic), Err(KernelError::InvalidImage));
        // 64-bit class is rejected too.
        let mut wide = image;
        wide[4] = 2;
        assert_eq!(validate(&wide), Err(KernelError::InvalidImage));
    }

    #[test]
    fn single_segment_maps_one_page_with_zero_fill() {
        let (_arena, window, mut pmm) = fixture();
        let mut hw = RecordingHardware::default();
        let mut space = AddressSpace::new(&mut pmm, &window).unwrap();

        let payload: Vec<u8> = (1..=10).collect();
        let image = testutil::build_elf(
            0x1000,
            &[SegmentSpec {
                vaddr: 0x1000,
                file_bytes: &payload,
                mem_size: 4096,
                writable: true,
            }],
        );

        let used_before = pmm.used_count();
        let entry = load(&image, &mut space, &mut pmm, &window, &mut hw).unwrap();
        assert_eq!(entry.as_u32(), 0x1000);

        // Exactly one page for the segment plus one second-level table.
        assert_eq!(pmm.used_count(), used_before + 2);

        let pte = space
            .get_page(VirtAddr::new(0x1000), false, &mut pmm, &window)
            .unwrap()
            .expect("segment page missing");
        assert!(pte.is_present());
        assert!(pte.flags().contains(PteFlags::WRITABLE));
        assert!(pte.flags().contains(PteFlags::USER));

        let mut contents = vec![0u8; 4096];
        space
            .read_bytes(&window, VirtAddr::new(0x1000), &mut contents)
            .unwrap();
        assert_eq!(&contents[..10], payload.as_slice());
        assert!(contents[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn read_only_segment_is_not_writable() {
        let (_arena, window, mut pmm) = fixture();
        let mut hw = RecordingHardware::default();
        let mut space = AddressSpace::new(&mut pmm, &window).unwrap();

        let image = testutil::build_elf(
            0x2000,
            &[SegmentSpec {
                vaddr: 0x2000,
                file_bytes: b"\xc3",
                mem_size: 16,
                writable: false,
            }],
        );
        load(&image, &mut space, &mut pmm, &window, &mut hw).unwrap();

        let pte = space
            .get_page(VirtAddr::new(0x2000), false, &mut pmm, &window)
            .unwrap()
            .unwrap();
        assert!(!pte.flags().contains(PteFlags::WRITABLE));
        assert!(pte.flags().contains(PteFlags::USER));
    }

    #[test]
    fn multi_page_segment_covers_the_range() {
        let (_arena, window, mut pmm) = fixture();
        let mut hw = RecordingHardware::default();
        let mut space = AddressSpace::new(&mut pmm, &window).unwrap();

        let payload = vec![0xabu8; 5000];
        let image = testutil::build_elf(
            0x40_0000,
            &[SegmentSpec {
                vaddr: 0x40_0000,
                file_bytes: &payload,
                mem_size: 9000,
                writable: true,
            }],
        );
        load(&image, &mut space, &mut pmm, &window, &mut hw).unwrap();

        // ceil(9000 / 4096) = 3 pages mapped.
        for page in 0..3u32 {
            assert!(space
                .translate(&window, VirtAddr::new(0x40_0000 + page * 4096))
                .is_some());
        }
        assert!(space
            .translate(&window, VirtAddr::new(0x40_0000 + 3 * 4096))
            .is_none());

        let mut tail = vec![0u8; 9000 - 5000];
        space
            .read_bytes(&window, VirtAddr::new(0x40_0000 + 5000), &mut tail)
            .unwrap();
        assert!(tail.iter().all(|&b| b == 0));
    }

    #[test]
    fn truncated_segment_payload_is_invalid() {
        let (_arena, window, mut pmm) = fixture();
        let mut hw = RecordingHardware::default();
        let mut space = AddressSpace::new(&mut pmm, &window).unwrap();

        let mut image = testutil::build_elf(
            0x1000,
            &[SegmentSpec {
                vaddr: 0x1000,
                file_bytes: &[0u8; 64],
                mem_size: 64,
                writable: false,
            }],
        );
        image.truncate(image.len() - 32);
        let err = load(&image, &mut space, &mut pmm, &window, &mut hw);
        assert_eq!(err, Err(KernelError::InvalidImage));
    }

    #[test]
    fn allocation_failure_aborts_the_load() {
        let (_arena, window) = testutil::arena(8);
        let mut pmm = FrameBitmap::init(&window, 8 * 4096, 4096);
        let mut hw = RecordingHardware::default();
        let mut space = AddressSpace::new(&mut pmm, &window).unwrap();

        // Large enough that the segment cannot possibly fit.
        let image = testutil::build_elf(
            0x1000,
            &[SegmentSpec {
                vaddr: 0x1000,
                file_bytes: &[1, 2, 3],
                mem_size: 64 * 4096,
                writable: true,
            }],
        );
        let err = load(&image, &mut space, &mut pmm, &window, &mut hw);
        assert_eq!(err, Err(KernelError::OutOfMemory));
    }
}
