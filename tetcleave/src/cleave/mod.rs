//! The cleaving pipeline
//!
//! Deforms a BCC background lattice to conform to the material interfaces
//! of a [`Volume`], then re-triangulates every cut tet with a static
//! stencil.  The stages run strictly in order:
//!
//! 1. background lattice ([`crate::lattice`])
//! 2. material sampling ([`sample`])
//! 3. alpha safety parameters ([`sample`])
//! 4. interface geometry: cuts, triples, quadruples ([`interface`])
//! 5. generalization to the full interface pattern ([`generalize`])
//! 6. snapping and warping of violations ([`warp`])
//! 7. stencil re-triangulation ([`stencil`])
//!
//! [`CleaverMesher`] drives them; each stage is also public so tests can
//! stop the pipeline mid-flight and inspect the mesh.
use log::info;

use crate::lattice::{self, LatticeOptions};
use crate::mesh::TetMesh;
use crate::volume::Volume;
use crate::Error;

mod generalize;
mod interface;
mod sample;
mod stencil;
pub(crate) mod violation;
mod warp;

pub use generalize::generalize_tets;
pub use interface::compute_interfaces;
pub use sample::{compute_alphas, sample_volume};
pub use stencil::stencil_background_tets;
pub use warp::snap_and_warp_violations;

/// Tuning parameters for the cleaving pipeline
#[derive(Copy, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CleaverConfig {
    /// Uniform alpha fraction for adaptive lattices
    pub alpha_init: f64,
    /// Alpha fraction for axis-aligned edges of a constant lattice
    pub alpha_long: f64,
    /// Alpha fraction for diagonal edges of a constant lattice
    pub alpha_short: f64,
    /// Convergence tolerance on the two competing material values at a
    /// solved cut crossing
    pub cut_tolerance: f64,
    /// Iteration cap for the cut crossing refinement
    pub cut_max_iterations: usize,
    /// Background lattice construction
    pub lattice: LatticeOptions,
    /// Drop tets labeled with the synthetic exterior material at the end
    pub strip_exterior: bool,
}

impl Default for CleaverConfig {
    fn default() -> Self {
        Self {
            alpha_init: 0.4,
            alpha_long: 0.357,
            alpha_short: 0.203,
            cut_tolerance: 1e-9,
            cut_max_iterations: 32,
            lattice: LatticeOptions::default(),
            strip_exterior: true,
        }
    }
}

/// Pipeline driver with explicit stage state
///
/// Stages must run in order; calling one before its prerequisite returns
/// [`Error::StageOrder`].  [`CleaverMesher::cleave`] runs everything.
pub struct CleaverMesher<'a> {
    volume: &'a Volume,
    config: CleaverConfig,
    mesh: Option<TetMesh>,
    sampled: bool,
    alphas_done: bool,
    interfaces_done: bool,
    generalized: bool,
    snapped: bool,
    stenciled: bool,
}

impl<'a> CleaverMesher<'a> {
    /// Builds a mesher over `volume` with the given configuration
    pub fn new(volume: &'a Volume, config: CleaverConfig) -> Self {
        Self {
            volume,
            config,
            mesh: None,
            sampled: false,
            alphas_done: false,
            interfaces_done: false,
            generalized: false,
            snapped: false,
            stenciled: false,
        }
    }

    /// The configuration this mesher was built with
    pub fn config(&self) -> &CleaverConfig {
        &self.config
    }

    /// The mesh in its current pipeline state, if the background lattice
    /// has been built
    pub fn mesh(&self) -> Option<&TetMesh> {
        self.mesh.as_ref()
    }

    fn mesh_after(
        &mut self,
        stage: &'static str,
        done: bool,
        prereq: &'static str,
    ) -> Result<&mut TetMesh, Error> {
        if !done {
            return Err(Error::StageOrder(stage, prereq));
        }
        Ok(self.mesh.as_mut().unwrap_or_else(|| unreachable!()))
    }

    /// Stage 1: builds the background lattice and its adjacency
    pub fn create_background_mesh(&mut self) -> Result<(), Error> {
        let mut mesh =
            lattice::build_background_mesh(self.volume, &self.config.lattice)?;
        mesh.build_adjacency();
        self.mesh = Some(mesh);
        Ok(())
    }

    /// Stage 2: samples the dominant material at every lattice vertex
    pub fn sample_volume(&mut self) -> Result<(), Error> {
        let volume = self.volume;
        let mesh = self.mesh_after(
            "sample_volume",
            self.mesh.is_some(),
            "create_background_mesh",
        )?;
        sample::sample_volume(mesh, volume);
        self.sampled = true;
        Ok(())
    }

    /// Stage 3: computes alpha safety parameters for every edge
    pub fn compute_alphas(&mut self) -> Result<(), Error> {
        let config = self.config;
        let mesh =
            self.mesh_after("compute_alphas", self.sampled, "sample_volume")?;
        sample::compute_alphas(mesh, &config);
        self.alphas_done = true;
        Ok(())
    }

    /// Stage 4: computes cut, triple and quadruple interface vertices
    pub fn compute_interfaces(&mut self) -> Result<(), Error> {
        let volume = self.volume;
        let config = self.config;
        let mesh = self.mesh_after(
            "compute_interfaces",
            self.alphas_done,
            "compute_alphas",
        )?;
        interface::compute_interfaces(mesh, volume, &config);
        self.interfaces_done = true;
        Ok(())
    }

    /// Stage 5: generalizes cut tets to the full interface pattern
    pub fn generalize_tets(&mut self) -> Result<(), Error> {
        let mesh = self.mesh_after(
            "generalize_tets",
            self.interfaces_done,
            "compute_interfaces",
        )?;
        generalize::generalize_tets(mesh);
        self.generalized = true;
        Ok(())
    }

    /// Stage 6: snaps and warps all violations
    pub fn snap_and_warp(&mut self) -> Result<(), Error> {
        let mesh = self.mesh_after(
            "snap_and_warp",
            self.generalized,
            "generalize_tets",
        )?;
        warp::snap_and_warp_violations(mesh);
        self.snapped = true;
        Ok(())
    }

    /// Stage 7: replaces cut tets with their stencil sub-tets
    pub fn stencil_tets(&mut self) -> Result<(), Error> {
        let exterior = self.volume.number_of_materials();
        let strip = self.config.strip_exterior;
        let mesh =
            self.mesh_after("stencil_tets", self.snapped, "snap_and_warp")?;
        stencil::stencil_background_tets(mesh);
        if strip {
            mesh.remove_tets_with_label(exterior);
            mesh.compact_vertices();
        }
        mesh.build_adjacency();
        let (lo, hi) = mesh.compute_angles();
        info!(
            "cleaving done: {} verts, {} tets, dihedral angles in \
             [{lo:.2}, {hi:.2}]",
            mesh.vertex_count(),
            mesh.tet_count(),
        );
        self.stenciled = true;
        Ok(())
    }

    /// Runs the full pipeline and returns the finished mesh
    pub fn cleave(mut self) -> Result<TetMesh, Error> {
        self.create_background_mesh()?;
        self.sample_volume()?;
        self.compute_alphas()?;
        self.compute_interfaces()?;
        self.generalize_tets()?;
        self.snap_and_warp()?;
        self.stencil_tets()?;
        Ok(self.mesh.unwrap_or_else(|| unreachable!()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::field::{BoundingBox, SphereField};
    use nalgebra::Vector3;
    use std::sync::Arc;

    #[test]
    fn stages_enforce_ordering() {
        let b = BoundingBox::at_origin(Vector3::new(4.0, 4.0, 4.0));
        let s = Arc::new(SphereField::new(Vector3::new(2.0, 2.0, 2.0), 1.0, b));
        let v = Volume::new(vec![s]).unwrap();
        let mut m = CleaverMesher::new(&v, CleaverConfig::default());
        assert!(matches!(
            m.sample_volume(),
            Err(Error::StageOrder("sample_volume", _))
        ));
        assert!(matches!(
            m.stencil_tets(),
            Err(Error::StageOrder("stencil_tets", _))
        ));
        m.create_background_mesh().unwrap();
        assert!(matches!(
            m.compute_alphas(),
            Err(Error::StageOrder("compute_alphas", _))
        ));
        m.sample_volume().unwrap();
        m.compute_alphas().unwrap();
        m.compute_interfaces().unwrap();
        m.generalize_tets().unwrap();
        m.snap_and_warp().unwrap();
        m.stencil_tets().unwrap();
    }
}
