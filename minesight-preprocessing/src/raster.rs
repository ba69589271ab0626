//! Multi-band raster access on top of the `tiff` codec.
//!
//! A source raster is decoded once into a `(bands, rows, cols)` f32 cube.
//! Both common GeoTIFF layouts are accepted: one page per band, or a single
//! page with interleaved samples. Reduced-resolution (overview) and
//! transparency-mask pages are skipped. Patch files are written back as one
//! 32-bit float page per band whatever the source sample type, carrying the
//! georeferencing and GDAL nodata/metadata tags of a reference raster.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek};
use std::ops::RangeInclusive;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::debug;
use ndarray::{s, Array2, Array3, ArrayView3, Axis};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_METADATA: u16 = 42112;
const GDAL_NODATA: u16 = 42113;
const NEW_SUBFILE_TYPE: u16 = 254;

/// NewSubfileType bits of pages that are not full-resolution bands.
const REDUCED_RESOLUTION: u32 = 0b001;
const TRANSPARENCY_MASK: u32 = 0b100;

fn tiff_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Pixel-space rectangle, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn square(x: usize, y: usize, size: usize) -> Self {
        Self {
            x,
            y,
            width: size,
            height: size,
        }
    }
}

/// Windowed band reads over a multi-band grid. Bands are 1-based.
pub trait RasterSource {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn band_count(&self) -> usize;

    fn read_band(&self, band: usize, window: Window) -> Result<Array2<f32>>;

    /// Stack an inclusive range of bands into `(bands, rows, cols)`.
    fn read_bands(&self, bands: RangeInclusive<usize>, window: Window) -> Result<Array3<f32>> {
        let planes = bands
            .map(|b| self.read_band(b, window))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
        let cube = ndarray::stack(Axis(0), &views).context("stacking band windows")?;
        Ok(cube)
    }
}

/// GeoTIFF georeferencing tags plus GDAL's nodata and metadata strings,
/// copied verbatim onto derived files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoProfile {
    pub pixel_scale: Option<Vec<f64>>,
    pub tiepoint: Option<Vec<f64>>,
    pub transformation: Option<Vec<f64>>,
    pub geo_key_directory: Option<Vec<u16>>,
    pub geo_double_params: Option<Vec<f64>>,
    pub geo_ascii_params: Option<String>,
    /// GDAL_METADATA XML
    pub gdal_metadata: Option<String>,
    /// GDAL_NODATA, the nodata value as text
    pub gdal_nodata: Option<String>,
}

impl GeoProfile {
    fn from_decoder<R: Read + Seek>(decoder: &mut Decoder<R>) -> Self {
        Self {
            pixel_scale: decoder.get_tag_f64_vec(tiff_tag(MODEL_PIXEL_SCALE)).ok(),
            tiepoint: decoder.get_tag_f64_vec(tiff_tag(MODEL_TIEPOINT)).ok(),
            transformation: decoder.get_tag_f64_vec(tiff_tag(MODEL_TRANSFORMATION)).ok(),
            geo_key_directory: decoder.get_tag_u16_vec(tiff_tag(GEO_KEY_DIRECTORY)).ok(),
            geo_double_params: decoder.get_tag_f64_vec(tiff_tag(GEO_DOUBLE_PARAMS)).ok(),
            geo_ascii_params: decoder.get_tag_ascii_string(tiff_tag(GEO_ASCII_PARAMS)).ok(),
            gdal_metadata: decoder.get_tag_ascii_string(tiff_tag(GDAL_METADATA)).ok(),
            gdal_nodata: decoder.get_tag_ascii_string(tiff_tag(GDAL_NODATA)).ok(),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == GeoProfile::default()
    }

    /// Read only the georeferencing tags of a raster, skipping pixel data.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening raster {:?}", path))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .with_context(|| format!("initialising TIFF decoder for {:?}", path))?;
        Ok(Self::from_decoder(&mut decoder))
    }
}

/// A fully decoded raster held in memory.
#[derive(Debug, Clone)]
pub struct Raster {
    data: Array3<f32>,
    profile: GeoProfile,
}

impl Raster {
    pub fn from_array(data: Array3<f32>) -> Self {
        Self {
            data,
            profile: GeoProfile::default(),
        }
    }

    pub fn with_profile(mut self, profile: GeoProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn profile(&self) -> &GeoProfile {
        &self.profile
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening raster {:?}", path))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .with_context(|| format!("initialising TIFF decoder for {:?}", path))?
            .with_limits(Limits::unlimited());

        let profile = GeoProfile::from_decoder(&mut decoder);
        let mut grid: Option<(usize, usize)> = None;
        let mut bands: Vec<f32> = Vec::new();
        let mut band_count = 0;
        let mut page = 0;
        loop {
            let subfile = decoder
                .get_tag_u32(tiff_tag(NEW_SUBFILE_TYPE))
                .unwrap_or(0);
            if subfile & (REDUCED_RESOLUTION | TRANSPARENCY_MASK) != 0 {
                debug!("{:?}: skipping page {} (NewSubfileType={})", path, page, subfile);
            } else {
                let (w, h) = decoder
                    .dimensions()
                    .with_context(|| format!("reading dimensions of {:?}", path))?;
                let (w, h) = (w as usize, h as usize);
                let (width, height) = *grid.get_or_insert((w, h));
                if (w, h) != (width, height) {
                    bail!(
                        "page {} of {:?} is {}x{}, expected {}x{}",
                        page,
                        path,
                        w,
                        h,
                        width,
                        height
                    );
                }
                let plane = width * height;
                let samples = samples_to_f32(
                    decoder
                        .read_image()
                        .with_context(|| format!("decoding page of {:?}", path))?,
                )?;
                if plane == 0 || samples.len() % plane != 0 {
                    bail!(
                        "{:?}: {} samples do not tile a {}x{} grid",
                        path,
                        samples.len(),
                        width,
                        height
                    );
                }
                let per_pixel = samples.len() / plane;
                if per_pixel == 1 {
                    bands.extend_from_slice(&samples);
                } else {
                    for sample in 0..per_pixel {
                        bands.extend(samples.iter().skip(sample).step_by(per_pixel).copied());
                    }
                }
                band_count += per_pixel;
            }

            page += 1;
            if !decoder.more_images() {
                break;
            }
            decoder.next_image()?;
        }

        let Some((width, height)) = grid else {
            bail!("{:?} has no full-resolution page", path);
        };
        let data = Array3::from_shape_vec((band_count, height, width), bands)
            .with_context(|| format!("shaping bands of {:?}", path))?;
        Ok(Self { data, profile })
    }
}

impl RasterSource for Raster {
    fn width(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    fn height(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    fn band_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    fn read_band(&self, band: usize, window: Window) -> Result<Array2<f32>> {
        if band == 0 || band > self.band_count() {
            bail!("band {} out of range 1..={}", band, self.band_count());
        }
        if window.x + window.width > self.width() || window.y + window.height > self.height() {
            bail!(
                "window {:?} exceeds raster {}x{}",
                window,
                self.width(),
                self.height()
            );
        }
        Ok(self
            .data
            .slice(s![
                band - 1,
                window.y..window.y + window.height,
                window.x..window.x + window.width
            ])
            .to_owned())
    }
}

fn samples_to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    let out = match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => bail!("unsupported TIFF sample format"),
    };
    Ok(out)
}

/// Write a `(bands, rows, cols)` cube as a multi-page float TIFF.
pub fn write_raster(path: &Path, data: ArrayView3<f32>, profile: &GeoProfile) -> Result<()> {
    let (bands, height, width) = data.dim();
    let file = File::create(path).with_context(|| format!("creating {:?}", path))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))
        .with_context(|| format!("initialising TIFF encoder for {:?}", path))?;

    for band in 0..bands {
        let plane: Vec<f32> = data.index_axis(Axis(0), band).iter().copied().collect();
        let mut image = encoder
            .new_image::<colortype::Gray32Float>(width as u32, height as u32)
            .with_context(|| format!("starting band {} of {:?}", band + 1, path))?;
        {
            let dir = image.encoder();
            if let Some(v) = &profile.pixel_scale {
                dir.write_tag(tiff_tag(MODEL_PIXEL_SCALE), &v[..])?;
            }
            if let Some(v) = &profile.tiepoint {
                dir.write_tag(tiff_tag(MODEL_TIEPOINT), &v[..])?;
            }
            if let Some(v) = &profile.transformation {
                dir.write_tag(tiff_tag(MODEL_TRANSFORMATION), &v[..])?;
            }
            if let Some(v) = &profile.geo_key_directory {
                dir.write_tag(tiff_tag(GEO_KEY_DIRECTORY), &v[..])?;
            }
            if let Some(v) = &profile.geo_double_params {
                dir.write_tag(tiff_tag(GEO_DOUBLE_PARAMS), &v[..])?;
            }
            if let Some(v) = &profile.geo_ascii_params {
                dir.write_tag(tiff_tag(GEO_ASCII_PARAMS), v.as_str())?;
            }
            if let Some(v) = &profile.gdal_metadata {
                dir.write_tag(tiff_tag(GDAL_METADATA), v.as_str())?;
            }
            if let Some(v) = &profile.gdal_nodata {
                dir.write_tag(tiff_tag(GDAL_NODATA), v.as_str())?;
            }
        }
        image
            .write_data(&plane)
            .with_context(|| format!("writing band {} of {:?}", band + 1, path))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp(bands: usize, rows: usize, cols: usize) -> Array3<f32> {
        Array3::from_shape_fn((bands, rows, cols), |(b, y, x)| {
            (b * 10_000 + y * 100 + x) as f32
        })
    }

    #[test]
    fn read_band_returns_the_window() {
        let raster = Raster::from_array(ramp(3, 8, 8));
        let w = raster.read_band(2, Window::square(4, 2, 3)).unwrap();
        assert_eq!(w.dim(), (3, 3));
        assert_eq!(w[(0, 0)], 10_000.0 + 200.0 + 4.0);
        assert_eq!(w[(2, 2)], 10_000.0 + 400.0 + 6.0);
    }

    #[test]
    fn read_band_rejects_bad_band_and_window() {
        let raster = Raster::from_array(ramp(2, 4, 4));
        assert!(raster.read_band(0, Window::square(0, 0, 2)).is_err());
        assert!(raster.read_band(3, Window::square(0, 0, 2)).is_err());
        assert!(raster.read_band(1, Window::square(3, 0, 2)).is_err());
    }

    #[test]
    fn read_bands_stacks_in_order() {
        let raster = Raster::from_array(ramp(4, 6, 6));
        let cube = raster.read_bands(1..=3, Window::square(1, 1, 4)).unwrap();
        assert_eq!(cube.dim(), (3, 4, 4));
        assert_eq!(cube[(2, 0, 0)], 20_000.0 + 101.0);
    }

    #[test]
    fn write_then_open_keeps_bands_and_geo_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.tif");
        let profile = GeoProfile {
            pixel_scale: Some(vec![10.0, 10.0, 0.0]),
            tiepoint: Some(vec![0.0, 0.0, 0.0, 500_000.0, 2_600_000.0, 0.0]),
            geo_key_directory: Some(vec![1, 1, 0, 1, 3072, 0, 1, 32645]),
            gdal_metadata: Some("<GDALMetadata><Item name=\"SCALE\">0.0001</Item></GDALMetadata>".into()),
            gdal_nodata: Some("-9999".into()),
            ..GeoProfile::default()
        };
        let data = ramp(3, 5, 7);
        write_raster(&path, data.view(), &profile).unwrap();

        let back = Raster::open(&path).unwrap();
        assert_eq!(back.band_count(), 3);
        assert_eq!(back.height(), 5);
        assert_eq!(back.width(), 7);
        assert_eq!(back.data(), &data);
        assert_eq!(back.profile(), &profile);
        assert_eq!(GeoProfile::read(&path).unwrap(), profile);
    }

    fn write_pages(path: &Path, pages: &[(u32, u32, Option<u32>)]) {
        let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
        for (i, &(width, height, subfile)) in pages.iter().enumerate() {
            let plane: Vec<f32> = (0..width * height).map(|v| (i * 1000) as f32 + v as f32).collect();
            let mut image = encoder
                .new_image::<colortype::Gray32Float>(width, height)
                .unwrap();
            if let Some(kind) = subfile {
                image
                    .encoder()
                    .write_tag(tiff_tag(NEW_SUBFILE_TYPE), kind)
                    .unwrap();
            }
            image.write_data(&plane).unwrap();
        }
    }

    #[test]
    fn open_skips_overview_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("with_overview.tif");
        write_pages(&path, &[(8, 8, None), (8, 8, Some(0)), (4, 4, Some(1))]);

        let raster = Raster::open(&path).unwrap();
        assert_eq!(raster.band_count(), 2);
        assert_eq!((raster.width(), raster.height()), (8, 8));
        assert_eq!(raster.data()[(1, 0, 3)], 1003.0);
    }

    #[test]
    fn open_skips_mask_pages_but_rejects_mismatched_bands() {
        let dir = tempfile::tempdir().unwrap();
        let masked = dir.path().join("masked.tif");
        write_pages(&masked, &[(8, 8, None), (8, 8, Some(4))]);
        assert_eq!(Raster::open(&masked).unwrap().band_count(), 1);

        let ragged = dir.path().join("ragged.tif");
        write_pages(&ragged, &[(8, 8, None), (4, 4, None)]);
        let err = Raster::open(&ragged).unwrap_err();
        assert!(format!("{:#}", err).contains("expected 8x8"));
    }

    #[test]
    fn open_fails_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tif");
        std::fs::write(&path, b"not a tiff at all").unwrap();
        assert!(Raster::open(&path).is_err());
    }
}
