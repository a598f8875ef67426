/// Preprocessing functions turning image files into encoder input batches.
/// Images are decoded and resized in parallel, then packed into a
/// (batch_size, 3, image_size, image_size) array.

use std::path::PathBuf;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array, Dim};
use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::error::Result;

pub fn load_image_batch(paths: &[PathBuf]) -> Vec<Result<DynamicImage>>
{
	// Load the images in parallel
	paths.par_iter().map(
	{
		| path |
		{
			match image::open(path)
			{
				Ok(img) => Ok(img),
				Err(e) =>
				{
					log::error!("Error loading image: {:?} {:?}", path, e);
					Err(e.into())
				}
			}
		}
	}).collect::<Vec<Result<DynamicImage>>>()
}

pub fn resize_images(images: Vec<DynamicImage>, image_size: u32) -> Vec<DynamicImage>
{
	// Resize the images in parallel.
	// Aspect ratio is not kept; every sample has to fill the same square input.
	images.into_par_iter().map(
	{
		| original_img |
		{
			original_img.resize_exact(
				image_size,
				image_size,
				FilterType::CatmullRom)
		}
	}).collect::<Vec<DynamicImage>>()
}

/// Converts the images to a 4D (batch, channel, height, width) array,
/// scaling each channel to [0, 1] and standardizing it with `mean` and `std`.
/// All images must already be `image_size` x `image_size`.
pub fn images_to_input(images: &[DynamicImage], image_size: u32, mean: [f32; 3], std: [f32; 3]) -> Array<f32, Dim<[usize; 4]>>
{
	let size = image_size as usize;
	let mut image_input = Array::zeros((images.len(), 3, size, size));
	for (idx, img) in images.iter().enumerate()
	{
		let rgb = img.to_rgb8();
		for (x, y, pixel) in rgb.enumerate_pixels() {
			let x = x as usize;
			let y = y as usize;
			for channel in 0..3 {
				let value = (pixel.0[channel] as f32) / 255.;
				image_input[[idx, channel, y, x]] = (value - mean[channel]) / std[channel];
			}
		}
	}

	image_input
}
