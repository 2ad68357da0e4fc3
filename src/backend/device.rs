// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers and window surface extensions
// - Physical device selection (prefer discrete GPU, must present to the window)
// - Logical device with timeline semaphores and dynamic rendering
// - One or two queues from the graphics family (second one feeds the uploader)
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Weak};
use winit::window::Window;

use super::queue::VulkanQueue;
use super::vk_error;
use crate::error::{FrameError, FrameResult};

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    /// Dropped by hand before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub surface_loader: khr::Surface,
    pub surface: vk::SurfaceKHR,

    pub graphics_queue_family: u32,
    /// vkQueueSubmit and vkQueuePresentKHR need external synchronization.
    queues: Vec<Mutex<vk::Queue>>,

    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub properties: vk::PhysicalDeviceProperties,

    /// Handed to resources that must outlive their creator's borrow.
    this: Weak<VulkanDevice>,
}

impl VulkanDevice {
    /// Create the device and a presentation surface for `window`.
    pub fn new(app_name: &str, enable_validation: bool, window: &Window) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let display_handle = window.raw_display_handle();
        let instance = Self::create_instance(&entry, app_name, enable_validation, display_handle)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window.raw_window_handle(), None)
        }
        .context("Failed to create window surface")?;

        let (physical_device, graphics_queue_family, queue_count) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;
        let (device, queues) =
            Self::create_logical_device(&instance, physical_device, graphics_queue_family, queue_count)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}, {} queue(s) on family {}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version),
            queues.len(),
            graphics_queue_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU memory allocator")?;

        Ok(Arc::new_cyclic(|this| Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            _entry: entry,
            surface_loader,
            surface,
            graphics_queue_family,
            queues: queues.into_iter().map(Mutex::new).collect(),
            debug_utils,
            properties,
            this: this.clone(),
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display_handle: raw_window_handle::RawDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("frame-scheduler")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Window system is not supported by Vulkan")?
            .to_vec();
        if enable_validation {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;
        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;
        Ok((debug_utils, messenger))
    }

    /// Returns (device, graphics family, queues available in that family).
    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;
        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            if props.api_version < vk::API_VERSION_1_3 {
                continue;
            }

            let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
            let family = queue_families.iter().enumerate().find(|(i, family)| {
                family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    && unsafe {
                        surface_loader.get_physical_device_surface_support(device, *i as u32, surface)
                    }
                    .unwrap_or(false)
            });

            if let Some((index, family)) = family {
                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };

                if score > best_score {
                    best_score = score;
                    best_device = Some((device, index as u32, family.queue_count));
                }
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No GPU with Vulkan 1.3 can present to this window"))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        available_queues: u32,
    ) -> Result<(ash::Device, Vec<vk::Queue>)> {
        let count = available_queues.min(2) as usize;
        let queue_priorities = vec![1.0; count];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder().timeline_semaphore(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let queues = (0..count as u32)
            .map(|i| unsafe { device.get_device_queue(graphics_queue_family, i) })
            .collect();
        Ok((device, queues))
    }

    pub(crate) fn arc(&self) -> FrameResult<Arc<Self>> {
        self.this.upgrade().ok_or(FrameError::DeviceLost)
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub(crate) fn lock_queue(&self, index: usize) -> parking_lot::MutexGuard<'_, vk::Queue> {
        self.queues[index].lock()
    }

    /// Queue used by the frame scheduler.
    pub fn graphics_queue(self: &Arc<Self>) -> VulkanQueue {
        VulkanQueue::new(Arc::clone(self), 0)
    }

    /// Queue for the background uploader; shares the graphics queue when the
    /// family only exposes one.
    pub fn upload_queue(self: &Arc<Self>, dedicated: bool) -> VulkanQueue {
        let index = if dedicated && self.queues.len() > 1 { 1 } else { 0 };
        if index == 0 {
            log::info!("Uploads share the graphics queue");
        }
        VulkanQueue::new(Arc::clone(self), index)
    }

    pub fn min_uniform_alignment(&self) -> usize {
        self.properties.limits.min_uniform_buffer_offset_alignment as usize
    }

    pub(crate) fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> FrameResult<Allocation> {
        self.allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| FrameError::backend("allocate", e))
    }

    pub(crate) fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("Failed to free GPU allocation: {}", e);
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> FrameResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(vk_error("vkDeviceWaitIdle"))
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
