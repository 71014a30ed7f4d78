//! # PLY point cloud files
//!
//! Point clouds are written as a single `vertex` element with `float` x/y/z and `uchar`
//! red/green/blue properties, in ASCII or binary little endian encoding. The reader accepts
//! exactly that layout in either encoding.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::*;
use crate::point_cloud::{Point3D, PointCloud};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const PROPERTIES: [(&str, &str); 6] = [
    ("float", "x"),
    ("float", "y"),
    ("float", "z"),
    ("uchar", "red"),
    ("uchar", "green"),
    ("uchar", "blue")
];

/// Bytes per vertex in the binary encoding.
const RECORD_SIZE: usize = 3 * 4 + 3;

/// Upper bound on the vertices reserved up front when reading.
const MAX_PREALLOCATED_VERTICES: usize = 1 << 16;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlyFormat {
    #[default]
    Ascii,
    BinaryLittleEndian
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl PlyFormat {
    fn header_name(self) -> &'static str {
        match self {
            PlyFormat::Ascii => "ascii",
            PlyFormat::BinaryLittleEndian => "binary_little_endian"
        }
    }
}

impl PointCloud {
    /// Write the cloud to a PLY file.
    pub fn write_ply<P: AsRef<Path>>(&self, path: P, format: PlyFormat) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::export(path, e))?;
        let mut writer = BufWriter::new(file);

        write_ply(self, format, &mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| Error::export(path, e))?;

        log::info!("Wrote {} points to {}", self.len(), path.display());
        Ok(())
    }

    /// Read a PLY file written by [`PointCloud::write_ply`].
    pub fn read_ply<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::MalformedPly(format!("{}: {}", path.display(), e)))?;
        read_ply(&mut BufReader::new(file))
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Serialise a point cloud.
pub fn write_ply<W: Write>(cloud: &PointCloud, format: PlyFormat, writer: &mut W) -> std::io::Result<()> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format {} 1.0", format.header_name())?;
    writeln!(writer, "comment written by {}", env!("CARGO_PKG_NAME"))?;
    writeln!(writer, "element vertex {}", cloud.len())?;
    for (ty, name) in PROPERTIES {
        writeln!(writer, "property {} {}", ty, name)?;
    }
    writeln!(writer, "end_header")?;

    for p in cloud {
        let [r, g, b] = p.color;
        match format {
            PlyFormat::Ascii => {
                writeln!(
                    writer,
                    "{} {} {} {} {} {}",
                    p.position.x, p.position.y, p.position.z, r, g, b
                )?;
            }
            PlyFormat::BinaryLittleEndian => {
                writer.write_all(&p.position.x.to_le_bytes())?;
                writer.write_all(&p.position.y.to_le_bytes())?;
                writer.write_all(&p.position.z.to_le_bytes())?;
                writer.write_all(&[r, g, b])?;
            }
        }
    }

    Ok(())
}

/// Parse a point cloud in the layout produced by [`write_ply`].
pub fn read_ply<R: BufRead>(reader: &mut R) -> Result<PointCloud> {
    let (format, count) = read_header(reader)?;

    // The count comes from the file, so only trust it as far as the body backs it up
    let mut points = Vec::with_capacity(count.min(MAX_PREALLOCATED_VERTICES));
    match format {
        PlyFormat::Ascii => {
            let mut line = String::new();
            for i in 0..count {
                line.clear();
                let n = reader.read_line(&mut line).map_err(malformed)?;
                if n == 0 {
                    return Err(Error::MalformedPly(format!("expected {} vertices, found {}", count, i)));
                }
                points.push(parse_ascii_vertex(line.trim())?);
            }
        }
        PlyFormat::BinaryLittleEndian => {
            let mut record = [0u8; RECORD_SIZE];
            for i in 0..count {
                reader.read_exact(&mut record).map_err(|_| {
                    Error::MalformedPly(format!("expected {} vertices, found {}", count, i))
                })?;
                let f = |o: usize| f32::from_le_bytes([record[o], record[o + 1], record[o + 2], record[o + 3]]);
                points.push(Point3D::new(f(0), f(4), f(8), [record[12], record[13], record[14]]));
            }
        }
    }

    Ok(PointCloud::from_points(points))
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<(PlyFormat, usize)> {
    let mut lines = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).map_err(malformed)? == 0 {
            return Err(Error::MalformedPly("header ended before end_header".into()));
        }
        let trimmed = line.trim().to_owned();
        if trimmed == "end_header" {
            break;
        }
        if !trimmed.starts_with("comment") && !trimmed.is_empty() {
            lines.push(trimmed);
        }
    }

    let mut it = lines.iter().map(|l| l.split_whitespace().collect::<Vec<_>>());

    if it.next().as_deref() != Some(&["ply"][..]) {
        return Err(Error::MalformedPly("missing ply magic".into()));
    }

    let format = match it.next().as_deref() {
        Some(["format", "ascii", "1.0"]) => PlyFormat::Ascii,
        Some(["format", "binary_little_endian", "1.0"]) => PlyFormat::BinaryLittleEndian,
        other => return Err(Error::MalformedPly(format!("unsupported format line {:?}", other)))
    };

    let count = match it.next().as_deref() {
        Some(["element", "vertex", n]) => n
            .parse::<usize>()
            .map_err(|e| Error::MalformedPly(format!("bad vertex count {}: {}", n, e)))?,
        other => return Err(Error::MalformedPly(format!("expected vertex element, got {:?}", other)))
    };

    for (ty, name) in PROPERTIES {
        match it.next().as_deref() {
            Some(["property", t, n]) if type_matches(t, ty) && *n == name => {}
            other => {
                return Err(Error::MalformedPly(format!(
                    "expected property {} {}, got {:?}",
                    ty, name, other
                )))
            }
        }
    }

    if let Some(extra) = it.next() {
        return Err(Error::MalformedPly(format!("unexpected header line {:?}", extra)));
    }

    Ok((format, count))
}

fn type_matches(found: &str, expected: &str) -> bool {
    match expected {
        "float" => found == "float" || found == "float32",
        "uchar" => found == "uchar" || found == "uint8",
        _ => false
    }
}

fn parse_ascii_vertex(line: &str) -> Result<Point3D> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(Error::MalformedPly(format!("vertex line {:?} does not have 6 fields", line)));
    }

    let coord = |s: &str| {
        s.parse::<f32>().map_err(|e| Error::MalformedPly(format!("bad coordinate {}: {}", s, e)))
    };
    let channel = |s: &str| {
        s.parse::<u8>().map_err(|e| Error::MalformedPly(format!("bad colour {}: {}", s, e)))
    };

    Ok(Point3D::new(
        coord(fields[0])?,
        coord(fields[1])?,
        coord(fields[2])?,
        [channel(fields[3])?, channel(fields[4])?, channel(fields[5])?]
    ))
}

fn malformed(e: std::io::Error) -> Error {
    Error::MalformedPly(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> PointCloud {
        PointCloud::from_points(vec![
            Point3D::new(0.1, -2.5, 3.333_333_3, [255, 0, 17]),
            Point3D::new(1e-7, 12345.678, -0.0, [1, 2, 3]),
        ])
    }

    fn header_of(bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        let end = text.find("end_header").unwrap();
        text[..end].to_string()
    }

    #[test]
    fn empty_cloud_declares_zero_vertices() {
        let mut out = Vec::new();
        write_ply(&PointCloud::default(), PlyFormat::Ascii, &mut out).unwrap();
        assert!(header_of(&out).contains("element vertex 0\n"));

        let back = read_ply(&mut Cursor::new(out)).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn header_lists_vertex_properties() {
        let mut out = Vec::new();
        write_ply(&sample(), PlyFormat::Ascii, &mut out).unwrap();
        let header = header_of(&out);
        assert!(header.starts_with("ply\nformat ascii 1.0\n"));
        assert!(header.contains("element vertex 2\n"));
        assert!(header.contains(
            "property float x\nproperty float y\nproperty float z\n\
             property uchar red\nproperty uchar green\nproperty uchar blue\n"
        ));
    }

    #[test]
    fn ascii_and_binary_read_back_exactly() {
        for format in [PlyFormat::Ascii, PlyFormat::BinaryLittleEndian] {
            let mut out = Vec::new();
            write_ply(&sample(), format, &mut out).unwrap();
            let back = read_ply(&mut Cursor::new(out)).unwrap();
            assert_eq!(back, sample(), "{:?}", format);
        }
    }

    #[test]
    fn truncated_body_is_reported() {
        let mut out = Vec::new();
        write_ply(&sample(), PlyFormat::BinaryLittleEndian, &mut out).unwrap();
        out.truncate(out.len() - 4);
        assert!(matches!(read_ply(&mut Cursor::new(out)), Err(Error::MalformedPly(_))));
    }

    #[test]
    fn oversized_vertex_count_is_reported() {
        let header = |format: &str, count: &str| {
            format!(
                "ply\nformat {} 1.0\nelement vertex {}\n\
                 property float x\nproperty float y\nproperty float z\n\
                 property uchar red\nproperty uchar green\nproperty uchar blue\nend_header\n",
                format, count
            )
        };

        let binary = header("binary_little_endian", &usize::MAX.to_string());
        assert!(matches!(read_ply(&mut Cursor::new(binary)), Err(Error::MalformedPly(_))));

        let ascii = header("ascii", "4000000000") + "0 0 1 255 0 0\n";
        match read_ply(&mut Cursor::new(ascii)) {
            Err(Error::MalformedPly(msg)) => assert!(msg.contains("found 1"), "{}", msg),
            other => panic!("expected malformed PLY, got {:?}", other.map(|c| c.len()))
        }
    }

    #[test]
    fn foreign_layouts_are_rejected() {
        let text = "ply\nformat ascii 1.0\nelement vertex 1\nproperty double x\nend_header\n1\n";
        assert!(matches!(read_ply(&mut Cursor::new(text)), Err(Error::MalformedPly(_))));
    }

    #[test]
    fn unwritable_path_is_an_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("cloud.ply");
        let err = sample().write_ply(&path, PlyFormat::Ascii).unwrap_err();
        assert!(matches!(err, Error::Export { .. }));
    }
}
