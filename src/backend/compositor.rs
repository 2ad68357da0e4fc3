// Headless VR compositor
//
// Stands in for a VR runtime when no headset is attached: it reports a
// fixed per-eye resolution, produces a slowly turning head pose, and
// takes eye images without reading them. Render models "load" after a
// few polls so the retry path runs in the demo.

use glam::{Mat4, Quat, Vec3};

use super::{VulkanBackend, VulkanImage, VulkanQueue};
use crate::error::FrameResult;
use crate::frame::{
    Compositor, CompositorStatus, Extent, Eye, EyePose, HeadPose, LoadStatus, RenderModelInfo,
};

/// Interpupillary distance in meters.
const IPD: f32 = 0.064;

pub struct HeadlessCompositor {
    extent: Extent,
    frame: u64,
    submitted: u64,
    loading_polls: u32,
}

impl HeadlessCompositor {
    pub fn new(extent: Extent) -> Self {
        log::info!(
            "Using headless compositor ({}x{} per eye)",
            extent.width,
            extent.height
        );
        Self {
            extent,
            frame: 0,
            submitted: 0,
            loading_polls: 3,
        }
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    fn eye_pose(&self, head: Mat4, eye: Eye) -> EyePose {
        let side = match eye {
            Eye::Left => -0.5,
            Eye::Right => 0.5,
        };
        let eye_to_head = Mat4::from_translation(Vec3::new(side * IPD, 0.0, 0.0));
        let aspect = self.extent.width as f32 / self.extent.height.max(1) as f32;
        EyePose {
            view: (head * eye_to_head).inverse(),
            projection: Mat4::perspective_rh(90f32.to_radians(), aspect, 0.1, 100.0),
        }
    }
}

impl Compositor<VulkanBackend> for HeadlessCompositor {
    fn recommended_extent(&self) -> Extent {
        self.extent
    }

    fn wait_get_poses(&mut self) -> FrameResult<HeadPose> {
        self.frame += 1;
        let yaw = self.frame as f32 * 0.01;
        let head = Mat4::from_rotation_translation(Quat::from_rotation_y(yaw), Vec3::new(0.0, 1.7, 0.0));
        Ok(HeadPose {
            eyes: [self.eye_pose(head, Eye::Left), self.eye_pose(head, Eye::Right)],
        })
    }

    fn submit(&mut self, eye: Eye, image: &VulkanImage, _queue: &VulkanQueue) -> FrameResult<CompositorStatus> {
        log::trace!("Compositor received {:?} eye {:?}", eye, image.raw);
        self.submitted += 1;
        Ok(CompositorStatus::Accepted)
    }

    fn poll_render_model(&mut self, name: &str) -> FrameResult<LoadStatus<RenderModelInfo>> {
        if self.loading_polls > 0 {
            self.loading_polls -= 1;
            log::debug!("Render model '{}' still loading", name);
            return Ok(LoadStatus::Loading);
        }
        Ok(LoadStatus::Loaded(RenderModelInfo {
            vertex_count: 24,
            index_count: 36,
        }))
    }
}
