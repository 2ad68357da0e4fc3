// Stereo eye targets and VR compositor hand-off
//
// Each eye renders into its own off-screen target sized by the runtime,
// bracketed by ShaderRead -> RenderTarget -> ShaderRead transitions. Once
// the frame is submitted, both targets go to the compositor together with
// the queue that wrote them; the compositor synchronizes on its own.
// Target states declared by a frame that never reaches the GPU are rolled
// back to those of the last submitted frame.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use super::barrier::{ResourceState, StateTracker};
use super::hal::{Backend, Extent, Rect, RecordingContext, ResourceFactory};
use super::retry::{poll_until_loaded, LoadStatus, RetryPolicy};
use crate::error::FrameResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyePose {
    /// World -> eye.
    pub view: Mat4,
    pub projection: Mat4,
}

impl EyePose {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }
}

/// Poses for both eyes, as returned by the runtime's pose wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub eyes: [EyePose; 2],
}

impl HeadPose {
    pub fn eye(&self, eye: Eye) -> &EyePose {
        &self.eyes[eye.index()]
    }
}

/// Per-eye constant block written into the mapped constant ring.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct EyeConstants {
    pub view_projection: Mat4,
    pub eye_position: Vec4,
}

impl From<&EyePose> for EyeConstants {
    fn from(pose: &EyePose) -> Self {
        Self {
            view_projection: pose.view_projection(),
            eye_position: pose.position().extend(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorStatus {
    Accepted,
    /// The runtime dropped the frame (e.g. headset not tracking).
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderModelInfo {
    pub vertex_count: u32,
    pub index_count: u32,
}

/// Black-box consumer of finished eye images.
pub trait Compositor<B: Backend> {
    /// Per-eye render resolution, independent of any window.
    fn recommended_extent(&self) -> Extent;

    /// Block until the runtime hands out poses for the next frame.
    fn wait_get_poses(&mut self) -> FrameResult<HeadPose>;

    /// `image` was last written by work submitted on `queue`.
    fn submit(&mut self, eye: Eye, image: &B::Image, queue: &B::Queue) -> FrameResult<CompositorStatus>;

    fn poll_render_model(&mut self, name: &str) -> FrameResult<LoadStatus<RenderModelInfo>>;
}

pub struct EyeTarget<B: Backend> {
    pub eye: Eye,
    pub image: B::Image,
    pub extent: Extent,
}

pub struct StereoRenderer<B: Backend> {
    targets: [EyeTarget<B>; 2],
    states: StateTracker<Eye>,
    /// States as of the last frame handed to the compositor.
    committed: StateTracker<Eye>,
    /// Eyes recorded since the last compositor hand-off.
    recorded: [bool; 2],
}

impl<B: Backend> StereoRenderer<B> {
    pub fn new(device: &B::Device, extent: Extent) -> FrameResult<Self> {
        assert!(!extent.is_empty(), "eye targets need a non-empty extent");
        log::info!("Creating stereo eye targets: {}x{}", extent.width, extent.height);

        let target = |eye: Eye| -> FrameResult<EyeTarget<B>> {
            Ok(EyeTarget {
                eye,
                image: device.create_render_target(extent)?,
                extent,
            })
        };

        let mut states = StateTracker::new();
        for eye in Eye::BOTH {
            states.register(eye, ResourceState::Undefined);
        }

        Ok(Self {
            targets: [target(Eye::Left)?, target(Eye::Right)?],
            committed: states.clone(),
            states,
            recorded: [false; 2],
        })
    }

    pub fn target(&self, eye: Eye) -> &EyeTarget<B> {
        &self.targets[eye.index()]
    }

    pub fn extent(&self) -> Extent {
        self.targets[0].extent
    }

    pub fn state(&self, eye: Eye) -> ResourceState {
        self.states.state(&eye).unwrap_or(ResourceState::Undefined)
    }

    fn transition(&mut self, ctx: &mut B::Context, eye: Eye, after: ResourceState) {
        if let Some(t) = self.states.transition(&eye, after) {
            ctx.image_barrier(&self.targets[eye.index()].image, t);
        }
    }

    /// Record one eye: make it a render target, run `draw`, leave it shader-readable.
    pub fn record_eye(
        &mut self,
        ctx: &mut B::Context,
        eye: Eye,
        draw: impl FnOnce(&mut B::Context, &EyeTarget<B>),
    ) {
        self.transition(ctx, eye, ResourceState::RenderTarget);
        draw(ctx, &self.targets[eye.index()]);
        self.transition(ctx, eye, ResourceState::ShaderRead);
        self.recorded[eye.index()] = true;
    }

    /// Blit both eyes side by side into `dst`, which must already be a copy destination.
    pub fn record_mirror(&mut self, ctx: &mut B::Context, dst: &B::Image, dst_extent: Extent) {
        let half = dst_extent.width / 2;
        for eye in Eye::BOTH {
            self.transition(ctx, eye, ResourceState::CopySource);
            let rect = Rect {
                x: (eye.index() as u32 * half) as i32,
                y: 0,
                width: half,
                height: dst_extent.height,
            };
            let target = &self.targets[eye.index()];
            ctx.blit_image(&target.image, target.extent, dst, rect);
            self.transition(ctx, eye, ResourceState::ShaderRead);
        }
    }

    /// Hand both eyes to the compositor. Call after the frame is submitted
    /// and before the companion window presents.
    pub fn submit_to_compositor(
        &mut self,
        compositor: &mut impl Compositor<B>,
        queue: &B::Queue,
    ) -> FrameResult<[CompositorStatus; 2]> {
        assert!(
            self.recorded.iter().all(|&r| r),
            "compositor submit before both eyes were recorded"
        );
        // The frame is on the GPU, so its transitions are now the baseline.
        self.committed = self.states.clone();

        let mut statuses = [CompositorStatus::Skipped; 2];
        for eye in Eye::BOTH {
            debug_assert_eq!(self.state(eye), ResourceState::ShaderRead);
            statuses[eye.index()] = compositor.submit(eye, &self.targets[eye.index()].image, queue)?;
        }
        self.recorded = [false; 2];
        Ok(statuses)
    }

    /// Forget what the current frame recorded; it will not be submitted.
    pub fn abandon_frame(&mut self) {
        if self.recorded.iter().any(|&r| r) {
            log::debug!("Rolling back eye target states of an abandoned frame");
        }
        self.states = self.committed.clone();
        self.recorded = [false; 2];
    }
}

/// Wait for the runtime to finish loading a render model.
pub fn load_render_model<B: Backend>(
    compositor: &mut impl Compositor<B>,
    name: &str,
    policy: &RetryPolicy,
) -> FrameResult<RenderModelInfo> {
    poll_until_loaded("render model", policy, || compositor.poll_render_model(name))
}
