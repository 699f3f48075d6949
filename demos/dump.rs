//! Render a full-sky panorama of a precomputed model and write it to `sky.exr`
//!
//! Usage: `dump <model.ron> [settings.ron]`

use std::ffi::CStr;
use std::fs::File;
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use ash::version::{DeviceV1_0, EntryV1_0, InstanceV1_0};
use ash::{vk, Entry};
use half::f16;
use openexr::frame_buffer::PixelStruct;
use renderdoc::{RenderDoc, V100};

use skyglow::gpu::vulkan::VulkanGpu;
use skyglow::gpu::{SurfaceDraw, VertexAttribute, ViewRayShader};
use skyglow::{AtmosphereModel, AtmosphereRenderer, RenderSettings};

const WIDTH: u32 = 512;
const HEIGHT: u32 = 256;

/// Equirectangular camera: x spans azimuth, y spans elevation from zenith to nadir
fn panorama() -> ViewRayShader {
    ViewRayShader {
        vertex_source: "
layout(location = 0) out vec2 ndc;
void main() {
    ndc = position;
    gl_Position = vec4(position, 0.0, 1.0);
}
"
        .into(),
        fragment_source: "
layout(location = 0) in vec2 ndc;
vec3 calcViewDir() {
    float azimuth = ndc.x * 3.14159265;
    float elevation = -ndc.y * 1.57079633;
    return vec3(cos(elevation) * cos(azimuth), cos(elevation) * sin(azimuth), sin(elevation));
}
"
        .into(),
        vertex_attributes: vec![VertexAttribute {
            name: "position".into(),
            location: 0,
            components: 2,
        }],
        uniforms: Vec::new(),
    }
}

fn fullscreen(draw: &mut dyn SurfaceDraw) {
    draw.draw_triangles(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);
}

fn main() {
    let mut args = std::env::args().skip(1);
    let model_path = args.next().expect("usage: dump <model.ron> [settings.ron]");
    let model: AtmosphereModel =
        ron::from_str(&std::fs::read_to_string(&model_path).unwrap()).unwrap();
    let settings = match args.next() {
        Some(path) => RenderSettings::load(Path::new(&path)).unwrap(),
        None => RenderSettings::default(),
    };

    let mut rd = RenderDoc::<V100>::new().ok();
    unsafe {
        let entry = Entry::new().unwrap();
        let app_name = CStr::from_bytes_with_nul(b"skyglow dump\0").unwrap();
        let instance = entry
            .create_instance(
                &vk::InstanceCreateInfo::builder().application_info(
                    &vk::ApplicationInfo::builder()
                        .application_name(&app_name)
                        .application_version(0)
                        .engine_name(&app_name)
                        .engine_version(0)
                        .api_version(vk::make_version(1, 0, 36)),
                ),
                None,
            )
            .unwrap();

        let (pdevice, queue_family_index) = instance
            .enumerate_physical_devices()
            .unwrap()
            .iter()
            .find_map(|pdevice| {
                instance
                    .get_physical_device_queue_family_properties(*pdevice)
                    .iter()
                    .position(|info| info.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                    .map(|index| (*pdevice, index as u32))
            })
            .expect("no graphics device available");

        let device = Arc::new(
            instance
                .create_device(
                    pdevice,
                    &vk::DeviceCreateInfo::builder().queue_create_infos(&[
                        vk::DeviceQueueCreateInfo::builder()
                            .queue_family_index(queue_family_index)
                            .queue_priorities(&[1.0])
                            .build(),
                    ]),
                    None,
                )
                .unwrap(),
        );

        if let Some(ref mut rd) = rd {
            rd.start_frame_capture(renderdoc::DevicePointer::from(ptr::null()), ptr::null());
        }

        let gpu = VulkanGpu::new(&instance, device.clone(), pdevice, queue_family_index).unwrap();
        let mut renderer = AtmosphereRenderer::new(gpu, Arc::new(model)).unwrap();

        let total = renderer.begin_data_load(panorama(), &settings);
        assert!(total >= 0, "{:?}", renderer.last_error());
        loop {
            let progress = renderer.step_data_load();
            if progress.is_failed() {
                panic!("{}", renderer.current_activity());
            }
            eprint!("\r{:>4}/{} {:<72}", progress.steps_done, total, renderer.current_activity());
            if progress.is_complete() {
                break;
            }
        }
        eprintln!();

        renderer.resize(WIDTH, HEIGHT).unwrap();
        renderer
            .draw(&settings, 1.0, true, &mut fullscreen)
            .unwrap();

        let mut pixels = Vec::with_capacity((WIDTH * HEIGHT) as usize);
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let l = renderer.get_pixel_luminance(x, y).unwrap();
                pixels.push([
                    f16::from_f32(l.photopic[0]),
                    f16::from_f32(l.photopic[1]),
                    f16::from_f32(l.photopic[2]),
                    f16::from_f32(l.scotopic),
                ]);
            }
        }
        write_image("sky", &pixels, WIDTH, HEIGHT);

        drop(renderer);

        if let Some(ref mut rd) = rd {
            rd.end_frame_capture(renderdoc::DevicePointer::from(ptr::null()), ptr::null());
        }

        device.device_wait_idle().unwrap();
        device.destroy_device(None);
        instance.destroy_instance(None);
    }
}

/// Photopic luminance in RGB, scotopic in A
fn write_image<T: PixelStruct>(name: &str, data: &[T], width: u32, height: u32) {
    use openexr::{FrameBuffer, Header, ScanlineOutputFile};
    let mut file = File::create(format!("{}.exr", name)).unwrap();

    let mut header = Header::new();
    header.set_resolution(width, height);
    for (&channel, ty) in ["R", "G", "B", "A"]
        .iter()
        .zip((0..).map(|i| T::channel(i).0))
    {
        header.add_channel(channel, ty);
    }
    let mut exr_file = ScanlineOutputFile::new(&mut file, &header).unwrap();

    let mut fb = FrameBuffer::new(width, height);
    fb.insert_channels(&["R", "G", "B", "A"], data);
    exr_file.write_pixels(&fb).unwrap();
}
