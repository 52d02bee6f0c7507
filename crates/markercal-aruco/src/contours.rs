//! Border following on binary images (Suzuki & Abe, 1985).

use markercal_core::GrayImageView;

/// One traced border, in pixel coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<(i32, i32)>,
    /// True for the border of a hole (background enclosed by foreground).
    pub hole: bool,
}

// 8-neighbourhood, counter-clockwise starting east (y grows downward).
const NEIGHBORS: [(i32, i32); 8] = [
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Labelled copy of the input with a one pixel zero frame.
struct Padded {
    width: usize,
    labels: Vec<i32>,
}

impl Padded {
    fn new(src: &GrayImageView<'_>) -> Self {
        let width = src.width + 2;
        let mut labels = vec![0i32; width * (src.height + 2)];
        for y in 0..src.height {
            for x in 0..src.width {
                if src.data[y * src.width + x] != 0 {
                    labels[(y + 1) * width + x + 1] = 1;
                }
            }
        }
        Self { width, labels }
    }

    #[inline]
    fn offset(&self, dir: usize) -> isize {
        let (dx, dy) = NEIGHBORS[dir & 7];
        dx as isize + dy as isize * self.width as isize
    }
}

/// Extract all outer and hole borders of the non-zero regions of `src`.
pub fn find_contours(src: &GrayImageView<'_>) -> Vec<Contour> {
    let mut img = Padded::new(src);
    let mut contours = Vec::new();
    let mut nbd = 1i32;

    for y in 0..src.height {
        let mut pos = (y + 1) * img.width + 1;
        for x in 0..src.width {
            let pix = img.labels[pos];
            if pix != 0 {
                let outer = pix == 1 && img.labels[pos - 1] == 0;
                let hole = !outer && pix >= 1 && img.labels[pos + 1] == 0;
                if outer || hole {
                    nbd += 1;
                    let start = (x as i32, y as i32);
                    contours.push(follow_border(&mut img, pos, nbd, start, hole));
                }
            }
            pos += 1;
        }
    }

    contours
}

fn follow_border(img: &mut Padded, pos: usize, nbd: i32, start: (i32, i32), hole: bool) -> Contour {
    let mut points = Vec::new();
    let at = |p: usize, dir: usize, img: &Padded| (p as isize + img.offset(dir)) as usize;

    // Search clockwise for the first non-zero neighbour, starting from the
    // pixel we entered from (west for outer borders, east for holes).
    let mut s: usize = if hole { 0 } else { 4 };
    let s_end = s;
    let mut first = None;
    loop {
        s = (s + 7) & 7;
        let p = at(pos, s, img);
        if img.labels[p] != 0 {
            first = Some((s, p));
            break;
        }
        if s == s_end {
            break;
        }
    }

    let Some((mut s, pos1)) = first else {
        // Isolated pixel.
        img.labels[pos] = -nbd;
        points.push(start);
        return Contour { points, hole };
    };

    let mut point = start;
    let mut pos3 = pos;
    loop {
        // Counter-clockwise search around pos3 starting after the previous pixel.
        let prev = s;
        let mut pos4;
        let mut k = 0;
        loop {
            s = (s + 1) & 15;
            k += 1;
            pos4 = at(pos3, s, img);
            if img.labels[pos4] != 0 || k > 16 {
                break;
            }
        }
        s &= 7;

        // East neighbour examined and zero: right border of the component.
        if s.wrapping_sub(1) < prev {
            img.labels[pos3] = -nbd;
        } else if img.labels[pos3] == 1 {
            img.labels[pos3] = nbd;
        }

        points.push(point);
        let (dx, dy) = NEIGHBORS[s];
        point = (point.0 + dx, point.1 + dy);

        if pos4 == pos && pos3 == pos1 {
            break;
        }
        pos3 = pos4;
        s = (s + 4) & 7;
    }

    Contour { points, hole }
}

#[cfg(test)]
mod tests {
    use super::*;
    use markercal_core::GrayImage;

    fn filled_rect(w: usize, h: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for y in y0..y1 {
            for x in x0..x1 {
                img.set(x, y, 255);
            }
        }
        img
    }

    #[test]
    fn single_square_has_one_outer_border() {
        let img = filled_rect(10, 10, 2, 3, 6, 7);
        let contours = find_contours(&img.view());
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        assert!(!c.hole);
        // A 4x4 block has 12 border pixels.
        assert_eq!(c.points.len(), 12);
        assert_eq!(c.points[0], (2, 3));
        for &(x, y) in &c.points {
            assert!((2..6).contains(&x) && (3..7).contains(&y));
            assert!(x == 2 || x == 5 || y == 3 || y == 6);
        }
    }

    #[test]
    fn frame_has_outer_and_hole_border() {
        let mut img = filled_rect(12, 12, 1, 1, 11, 11);
        for y in 4..8 {
            for x in 4..8 {
                img.set(x, y, 0);
            }
        }
        let contours = find_contours(&img.view());
        assert_eq!(contours.len(), 2);
        assert!(!contours[0].hole);
        assert!(contours[1].hole);
    }

    #[test]
    fn isolated_pixel_is_a_single_point_contour() {
        let img = filled_rect(5, 5, 2, 2, 3, 3);
        let contours = find_contours(&img.view());
        assert_eq!(contours, vec![Contour { points: vec![(2, 2)], hole: false }]);
    }

    #[test]
    fn empty_image_has_no_contours() {
        let img = GrayImage::new(8, 8);
        assert!(find_contours(&img.view()).is_empty());
    }
}
