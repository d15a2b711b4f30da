//! TetGen `.node` / `.ele` file IO
//!
//! The finished mesh is exchanged in the TetGen ASCII pair: a `.node`
//! file listing vertex positions and an `.ele` file listing tets, with
//! the material label as an optional element attribute.  Indices are
//! 1-based on disk.
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::info;
use nalgebra::Vector3;

use crate::mesh::{Tet, TetMesh, Vertex};
use crate::Error;

/// Lines of a TetGen file, with comments and blanks stripped
fn data_lines<R: BufRead>(r: R) -> impl Iterator<Item = Result<String, Error>> {
    r.lines().filter_map(|line| match line {
        Ok(s) => {
            let s = s.trim();
            if s.is_empty() || s.starts_with('#') {
                None
            } else {
                Some(Ok(s.to_owned()))
            }
        }
        Err(e) => Some(Err(e.into())),
    })
}

fn read_node<R: BufRead>(r: R) -> Result<Vec<Vertex>, Error> {
    let bad = |msg: &str| Error::BadNodeFile(msg.to_owned());
    let mut lines = data_lines(r);

    let header = lines.next().ok_or_else(|| bad("missing header"))??;
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(bad("truncated header"));
    }
    let count: usize =
        fields[0].parse().map_err(|_| bad("bad vertex count"))?;
    if fields[1] != "3" {
        return Err(bad("dimension must be 3"));
    }

    let mut verts = Vec::with_capacity(count);
    for _ in 0..count {
        let line = lines.next().ok_or_else(|| bad("truncated file"))??;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(Error::BadNodeFile(format!(
                "short vertex line `{line}`"
            )));
        }
        let mut pos = [0.0; 3];
        for (p, s) in pos.iter_mut().zip(&fields[1..4]) {
            *p = s.parse().map_err(|_| {
                Error::BadNodeFile(format!("bad coordinate `{s}`"))
            })?;
        }
        verts.push(Vertex::new(Vector3::new(pos[0], pos[1], pos[2])));
    }
    Ok(verts)
}

fn read_ele<R: BufRead>(r: R, vert_count: usize) -> Result<Vec<Tet>, Error> {
    let bad = |msg: &str| Error::BadEleFile(msg.to_owned());
    let mut lines = data_lines(r);

    let header = lines.next().ok_or_else(|| bad("missing header"))??;
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(bad("truncated header"));
    }
    let count: usize = fields[0].parse().map_err(|_| bad("bad tet count"))?;
    if fields[1] != "4" {
        return Err(bad("only 4-node tets are supported"));
    }
    let attrs: usize = match fields.get(2) {
        Some(s) => s.parse().map_err(|_| bad("bad attribute count"))?,
        None => 0,
    };
    if attrs > 2 {
        return Err(bad("too many element attributes"));
    }

    let mut tets = Vec::with_capacity(count);
    for _ in 0..count {
        let line = lines.next().ok_or_else(|| bad("truncated file"))??;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 + attrs {
            return Err(Error::BadEleFile(format!(
                "short element line `{line}`"
            )));
        }
        let mut verts = [0; 4];
        for (v, s) in verts.iter_mut().zip(&fields[1..5]) {
            let i: usize = s.parse().map_err(|_| {
                Error::BadEleFile(format!("bad vertex reference `{s}`"))
            })?;
            // 1-based on disk
            *v = i
                .checked_sub(1)
                .ok_or(Error::BadVertexIndex(i, vert_count))?;
            if *v >= vert_count {
                return Err(Error::BadVertexIndex(i, vert_count));
            }
        }
        let label = match attrs {
            0 => 0,
            // materials are written shifted up by one
            _ => {
                let m: usize = fields[5].parse().map_err(|_| {
                    Error::BadEleFile(format!(
                        "bad material attribute in `{line}`"
                    ))
                })?;
                m.checked_sub(1)
                    .ok_or_else(|| bad("material attribute must be >= 1"))?
            }
        };
        tets.push(Tet::new(verts, label));
    }
    Ok(tets)
}

/// Reads a mesh from `stem.node` and `stem.ele`
///
/// Element attributes beyond the material label are ignored.  The
/// returned mesh has no adjacency built.
pub fn read_node_ele<P: AsRef<Path>>(stem: P) -> Result<TetMesh, Error> {
    let stem = stem.as_ref();
    let node = BufReader::new(File::open(stem.with_extension("node"))?);
    let verts = read_node(node)?;
    let ele = BufReader::new(File::open(stem.with_extension("ele"))?);
    let tets = read_ele(ele, verts.len())?;
    info!(
        "read {} vertices and {} tets from {}.{{node,ele}}",
        verts.len(),
        tets.len(),
        stem.display()
    );
    Ok(TetMesh::new(verts, tets))
}

/// Writes the mesh to `stem.node` and `stem.ele`, with the material
/// label (shifted to 1-based) as an element attribute
pub fn write_node_ele<P: AsRef<Path>>(
    mesh: &TetMesh,
    stem: P,
) -> Result<(), Error> {
    let stem = stem.as_ref();

    let mut node =
        BufWriter::new(File::create(stem.with_extension("node"))?);
    writeln!(node, "# node count, 3 dim, no attributes, no markers")?;
    writeln!(node, "{} 3 0 0", mesh.vertex_count())?;
    for (i, v) in mesh.verts.iter().enumerate() {
        writeln!(node, "{} {} {} {}", i + 1, v.pos.x, v.pos.y, v.pos.z)?;
    }
    node.flush()?;

    let mut ele = BufWriter::new(File::create(stem.with_extension("ele"))?);
    writeln!(ele, "# tet count, nodes per tet, attribute count")?;
    writeln!(ele, "{} 4 1", mesh.tet_count())?;
    for (i, t) in mesh.tets.iter().enumerate() {
        let [a, b, c, d] = t.verts;
        writeln!(
            ele,
            "{} {} {} {} {} {}",
            i + 1,
            a + 1,
            b + 1,
            c + 1,
            d + 1,
            t.label + 1
        )?;
    }
    ele.flush()?;

    info!(
        "wrote {} vertices and {} tets to {}.{{node,ele}}",
        mesh.vertex_count(),
        mesh.tet_count(),
        stem.display()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    const NODE: &str = "\
# comment
4 3 0 0

1 0.0 0.0 0.0
2 1.0 0.0 0.0
3 0.0 1.0 0.0
4 0.0 0.0 1.0
";

    const ELE: &str = "\
1 4 1
1 1 2 3 4 2
";

    #[test]
    fn parses_node_and_ele() {
        let verts = read_node(Cursor::new(NODE)).unwrap();
        assert_eq!(verts.len(), 4);
        assert_eq!(verts[1].pos, Vector3::new(1.0, 0.0, 0.0));

        let tets = read_ele(Cursor::new(ELE), verts.len()).unwrap();
        assert_eq!(tets.len(), 1);
        assert_eq!(tets[0].verts, [0, 1, 2, 3]);
        assert_eq!(tets[0].label, 1);
    }

    #[test]
    fn rejects_out_of_range_vertex() {
        let ele = "1 4 0\n1 1 2 3 9\n";
        let err = read_ele(Cursor::new(ele), 4).unwrap_err();
        assert!(matches!(err, Error::BadVertexIndex(9, 4)));
    }

    #[test]
    fn rejects_wrong_dimension() {
        let err = read_node(Cursor::new("4 2 0 0\n")).unwrap_err();
        assert!(matches!(err, Error::BadNodeFile(_)));
    }

    #[test]
    fn roundtrips_through_disk() {
        let verts = read_node(Cursor::new(NODE)).unwrap();
        let tets = read_ele(Cursor::new(ELE), verts.len()).unwrap();
        let mesh = TetMesh::new(verts, tets);

        let stem = std::env::temp_dir().join("tetcleave_io_roundtrip");
        write_node_ele(&mesh, &stem).unwrap();
        let back = read_node_ele(&stem).unwrap();

        assert_eq!(back.vertex_count(), mesh.vertex_count());
        assert_eq!(back.tets[0].verts, mesh.tets[0].verts);
        assert_eq!(back.tets[0].label, mesh.tets[0].label);
    }
}
