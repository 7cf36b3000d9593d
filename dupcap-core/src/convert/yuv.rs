//! BGRA to I420 color conversion (BT.601, limited range)
//!
//! Luma is computed per pixel; each chroma sample averages a 2x2 block.
//! Chroma planes use the floored half size, so an odd last column or row
//! contributes to luma only.

use crate::error::{CaptureError, Result};
use crate::formats::{bgra_pitch, yuv420_plane_dims};

/// BGRA pixel as laid out in memory
type Bgra = [u8; 4];

#[inline]
fn luma(r: i32, g: i32, b: i32) -> u8 {
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8
}

#[inline]
fn chroma_u(r: i32, g: i32, b: i32) -> u8 {
    (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8
}

#[inline]
fn chroma_v(r: i32, g: i32, b: i32) -> u8 {
    (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8
}

fn bgra_row(src: &[u8], pitch: usize, row_bytes: usize, y: usize) -> &[Bgra] {
    bytemuck::cast_slice(&src[y * pitch..y * pitch + row_bytes])
}

/// Convert a BGRA image with `src_pitch` bytes per row into tightly packed
/// Y, U and V planes
pub fn bgra_to_i420(
    src: &[u8],
    src_pitch: usize,
    width: u32,
    height: u32,
    y_plane: &mut [u8],
    u_plane: &mut [u8],
    v_plane: &mut [u8],
) -> Result<()> {
    let [(yw, yh), (cw, ch), _] = yuv420_plane_dims(width, height);
    let (yw, yh, cw, ch) = (yw as usize, yh as usize, cw as usize, ch as usize);
    let row_bytes = bgra_pitch(width);

    if src_pitch < row_bytes || (yh > 0 && src.len() < src_pitch * (yh - 1) + row_bytes) {
        return Err(CaptureError::converter(format!(
            "source holds {} bytes, {}x{} at pitch {} needs more",
            src.len(),
            width,
            height,
            src_pitch
        )));
    }
    if y_plane.len() < yw * yh || u_plane.len() < cw * ch || v_plane.len() < cw * ch {
        return Err(CaptureError::converter("plane buffers too small for I420 output"));
    }

    let row = |y: usize| bgra_row(src, src_pitch, row_bytes, y);

    for y in 0..yh {
        let out = &mut y_plane[y * yw..(y + 1) * yw];
        for (dst, [b, g, r, _]) in out.iter_mut().zip(row(y)) {
            *dst = luma(*r as i32, *g as i32, *b as i32);
        }
    }

    for cy in 0..ch {
        let top = row(cy * 2);
        let bottom = row(cy * 2 + 1);
        for cx in 0..cw {
            let block = [top[cx * 2], top[cx * 2 + 1], bottom[cx * 2], bottom[cx * 2 + 1]];
            let (mut b, mut g, mut r) = (0i32, 0i32, 0i32);
            for [pb, pg, pr, _] in block {
                b += pb as i32;
                g += pg as i32;
                r += pr as i32;
            }
            let (r, g, b) = ((r + 2) / 4, (g + 2) / 4, (b + 2) / 4);
            u_plane[cy * cw + cx] = chroma_u(r, g, b);
            v_plane[cy * cw + cx] = chroma_v(r, g, b);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, bgra: Bgra) -> Vec<u8> {
        let pixels = vec![bgra; (width * height) as usize];
        bytemuck::cast_slice(&pixels).to_vec()
    }

    #[test]
    fn test_black_and_white() {
        let mut y = vec![0u8; 4];
        let mut u = vec![0u8; 1];
        let mut v = vec![0u8; 1];

        bgra_to_i420(&solid(2, 2, [0, 0, 0, 255]), 8, 2, 2, &mut y, &mut u, &mut v).unwrap();
        assert_eq!(y, vec![16; 4]);
        assert_eq!((u[0], v[0]), (128, 128));

        bgra_to_i420(&solid(2, 2, [255, 255, 255, 255]), 8, 2, 2, &mut y, &mut u, &mut v)
            .unwrap();
        assert_eq!(y, vec![235; 4]);
        assert_eq!((u[0], v[0]), (128, 128));
    }

    #[test]
    fn test_pure_red_chroma() {
        let mut y = vec![0u8; 4];
        let mut u = vec![0u8; 1];
        let mut v = vec![0u8; 1];
        bgra_to_i420(&solid(2, 2, [0, 0, 255, 255]), 8, 2, 2, &mut y, &mut u, &mut v).unwrap();
        assert_eq!(y[0], 82);
        assert_eq!(u[0], 90);
        assert_eq!(v[0], 240);
    }

    #[test]
    fn test_padded_source_and_odd_size() {
        // 3x3 image with 16-byte rows; chroma is 1x1 from the top-left block
        let mut src = vec![0u8; 16 * 3];
        for row in src.chunks_mut(16) {
            for px in row[..12].chunks_mut(4) {
                px.copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        let mut y = vec![0u8; 9];
        let mut u = vec![0u8; 1];
        let mut v = vec![0u8; 1];
        bgra_to_i420(&src, 16, 3, 3, &mut y, &mut u, &mut v).unwrap();
        assert!(y.iter().all(|&l| l == 235));
    }

    #[test]
    fn test_short_source_rejected() {
        let mut y = vec![0u8; 4];
        let mut u = vec![0u8; 1];
        let mut v = vec![0u8; 1];
        assert!(bgra_to_i420(&[0u8; 12], 8, 2, 2, &mut y, &mut u, &mut v).is_err());
    }
}
