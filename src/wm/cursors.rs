//! Built-in cursor images installed in the static pointer slots.

use crate::cache::{PointerItem, POINTER_SIZE};

const BLACK: [u8; 3] = [0, 0, 0];
const WHITE: [u8; 3] = [0xff, 0xff, 0xff];

/// Rows of the arrow, `#` outline, `.` fill.
const ARROW: [&str; 19] = [
    "#",
    "##",
    "#.#",
    "#..#",
    "#...#",
    "#....#",
    "#.....#",
    "#......#",
    "#.......#",
    "#........#",
    "#.........#",
    "#......#####",
    "#...#..#",
    "#..# #..#",
    "#.#  #..#",
    "##    #..#",
    "#     #..#",
    "       #..#",
    "        ##",
];

/// Rows of the text I-beam, drawn from column 12.
const IBEAM: [&str; 16] = [
    "###.###",
    "...#...",
    "   #",
    "   #",
    "   #",
    "   #",
    "   #",
    "   #",
    "   #",
    "   #",
    "   #",
    "   #",
    "   #",
    "   #",
    "...#...",
    "###.###",
];

/// Renders `rows` at (`left`, `top`) into a 24 bpp pointer.
///
/// Pixels not covered by the picture stay transparent: their AND-mask bit is
/// set and their color is black.
fn render(rows: &[&str], left: usize, top: usize, hotspot: (u16, u16)) -> PointerItem {
    let mut data = vec![0u8; POINTER_SIZE * POINTER_SIZE * 3];
    let mut mask = vec![0xffu8; POINTER_SIZE * POINTER_SIZE / 8];
    for (y, row) in rows.iter().enumerate() {
        for (x, cell) in row.bytes().enumerate() {
            let color = match cell {
                b'#' => BLACK,
                b'.' => WHITE,
                _ => continue,
            };
            let (px, py) = (left + x, top + y);
            if px >= POINTER_SIZE || py >= POINTER_SIZE {
                continue;
            }
            let at = py * POINTER_SIZE + px;
            data[at * 3..at * 3 + 3].copy_from_slice(&color);
            mask[at / 8] &= !(0x80 >> (at % 8));
        }
    }
    PointerItem {
        hotspot_x: hotspot.0,
        hotspot_y: hotspot.1,
        bpp: 24,
        data,
        mask,
    }
}

pub fn arrow() -> PointerItem {
    render(&ARROW, 0, 0, (0, 0))
}

pub fn ibeam() -> PointerItem {
    render(&IBEAM, 12, 8, (15, 16))
}
