//! Image XObject decoding: PDF image stream → [`RasterImage`] → PNG.
//!
//! ## Colour handling
//!
//! PNG stores grayscale and RGB (each with optional alpha) but has no CMYK
//! mode. Samples are therefore kept in their source colour model until
//! [`RasterImage::into_rgb`] is called, and the extractor only calls it for
//! CMYK-family images (the 4- and 5-channel cases). Grayscale, gray+alpha,
//! RGB and RGBA buffers are written exactly as decoded.
//!
//! ## Supported encodings
//!
//! * `DCTDecode` (JPEG) via the `image` crate
//! * `FlateDecode` / `LZWDecode` / unfiltered data via lopdf's decompressor
//! * 1, 2, 4, 8 and 16 bits per component
//! * DeviceGray/RGB/CMYK, CalGray/CalRGB, ICCBased (by `/N`) and Indexed
//! * `/Decode [1 0 …]` inversion and `/SMask` soft masks (as alpha)
//!
//! JPEG 2000, JBIG2, CCITT fax and stencil masks are reported as errors.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;
use thiserror::Error;
use tracing::trace;

/// Why an image could not be rasterised.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl DecodeError {
    fn new(msg: impl Into<String>) -> Self {
        DecodeError(msg.into())
    }
}

/// Colour model of the samples in a [`RasterImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
}

impl ColorModel {
    /// Colour components per pixel, alpha excluded.
    pub fn components(self) -> usize {
        match self {
            ColorModel::Gray => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
        }
    }
}

/// A decoded pixel buffer: 8-bit interleaved samples, alpha last when present.
#[derive(Debug, Clone)]
pub struct RasterImage {
    width: u32,
    height: u32,
    color: ColorModel,
    has_alpha: bool,
    samples: Vec<u8>,
}

impl RasterImage {
    /// Wrap raw samples, checking that the buffer length matches the layout.
    pub fn new(
        width: u32,
        height: u32,
        color: ColorModel,
        has_alpha: bool,
        samples: Vec<u8>,
    ) -> Result<Self, DecodeError> {
        let channels = color.components() + usize::from(has_alpha);
        let expected = checked_product(&[width as usize, height as usize, channels])?;
        if width == 0 || height == 0 {
            return Err(DecodeError::new(format!("empty image {width}x{height}")));
        }
        if samples.len() != expected {
            return Err(DecodeError::new(format!(
                "sample buffer is {} bytes, expected {} for {}x{}x{}",
                samples.len(),
                expected,
                width,
                height,
                channels
            )));
        }
        Ok(Self {
            width,
            height,
            color,
            has_alpha,
            samples,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color(&self) -> ColorModel {
        self.color
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    /// Number of channels per pixel, alpha included.
    pub fn channel_count(&self) -> usize {
        self.color.components() + usize::from(self.has_alpha)
    }

    /// True when the buffer cannot be written as PNG without conversion.
    pub fn needs_rgb_conversion(&self) -> bool {
        self.color == ColorModel::Cmyk
    }

    /// Convert CMYK (with or without alpha) to plain 3-channel RGB.
    ///
    /// Any other colour model is returned unchanged.
    pub fn into_rgb(self) -> RasterImage {
        if self.color != ColorModel::Cmyk {
            return self;
        }
        let stride = self.channel_count();
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.samples.chunks_exact(stride) {
            let k = 255 - u16::from(px[3]);
            for &c in &px[..3] {
                rgb.push(((255 - u16::from(c)) * k / 255) as u8);
            }
        }
        RasterImage {
            width: self.width,
            height: self.height,
            color: ColorModel::Rgb,
            has_alpha: false,
            samples: rgb,
        }
    }

    /// Hand the samples to the `image` crate without copying.
    pub fn into_dynamic(self) -> Result<DynamicImage, DecodeError> {
        let (w, h) = (self.width, self.height);
        let too_small = || DecodeError::new("sample buffer does not match dimensions");
        let img = match (self.color, self.has_alpha) {
            (ColorModel::Gray, false) => {
                DynamicImage::ImageLuma8(image::GrayImage::from_raw(w, h, self.samples).ok_or_else(too_small)?)
            }
            (ColorModel::Gray, true) => DynamicImage::ImageLumaA8(
                image::GrayAlphaImage::from_raw(w, h, self.samples).ok_or_else(too_small)?,
            ),
            (ColorModel::Rgb, false) => {
                DynamicImage::ImageRgb8(image::RgbImage::from_raw(w, h, self.samples).ok_or_else(too_small)?)
            }
            (ColorModel::Rgb, true) => {
                DynamicImage::ImageRgba8(image::RgbaImage::from_raw(w, h, self.samples).ok_or_else(too_small)?)
            }
            (ColorModel::Cmyk, _) => {
                return Err(DecodeError::new("CMYK samples must be converted to RGB before encoding"))
            }
        };
        Ok(img)
    }

    /// Encode as PNG at `path`, consuming the buffer.
    pub fn save_png(self, path: &Path) -> Result<(), DecodeError> {
        let img = self.into_dynamic()?;
        img.save_with_format(path, ImageFormat::Png)
            .map_err(|e| DecodeError::new(format!("PNG encoding failed: {e}")))
    }

    fn from_dynamic(img: DynamicImage) -> Result<Self, DecodeError> {
        let (w, h) = (img.width(), img.height());
        match img {
            DynamicImage::ImageLuma8(g) => RasterImage::new(w, h, ColorModel::Gray, false, g.into_raw()),
            other => RasterImage::new(w, h, ColorModel::Rgb, false, other.to_rgb8().into_raw()),
        }
    }

    fn with_alpha(self, mask: GrayImage) -> Result<Self, DecodeError> {
        if self.has_alpha {
            return Ok(self);
        }
        let mask = if mask.dimensions() != (self.width, self.height) {
            image::imageops::resize(&mask, self.width, self.height, FilterType::Nearest)
        } else {
            mask
        };
        let comps = self.color.components();
        let alpha = mask.into_raw();
        let mut out = Vec::with_capacity(self.samples.len() + alpha.len());
        for (px, a) in self.samples.chunks_exact(comps).zip(alpha) {
            out.extend_from_slice(px);
            out.push(a);
        }
        RasterImage::new(self.width, self.height, self.color, true, out)
    }
}

// ── PDF decoding ─────────────────────────────────────────────────────────

/// Colour space as declared by the image dictionary.
#[derive(Debug, Clone)]
enum PdfColorSpace {
    Device(ColorModel),
    Indexed {
        base: ColorModel,
        hival: usize,
        lookup: Vec<u8>,
    },
}

/// Decode the image XObject with the given object id, soft mask included.
pub fn rasterize(doc: &Document, id: ObjectId) -> Result<RasterImage, DecodeError> {
    let stream = doc
        .get_object(id)
        .and_then(Object::as_stream)
        .map_err(|e| DecodeError::new(format!("object {} {} is not a stream: {e}", id.0, id.1)))?;
    decode_stream(doc, stream, true)
}

fn decode_stream(doc: &Document, stream: &Stream, with_mask: bool) -> Result<RasterImage, DecodeError> {
    let dict = &stream.dict;

    let subtype = dict.get(b"Subtype").and_then(Object::as_name).unwrap_or(b"");
    if subtype != b"Image" {
        return Err(DecodeError::new("stream is not an image XObject"));
    }
    if dict
        .get(b"ImageMask")
        .ok()
        .and_then(|o| o.as_bool().ok())
        .unwrap_or(false)
    {
        return Err(DecodeError::new("stencil image masks are not supported"));
    }

    let width = positive_int(doc, dict, b"Width")?;
    let height = positive_int(doc, dict, b"Height")?;
    let bpc = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| resolve(doc, o).as_i64().ok())
        .unwrap_or(8) as u8;
    let filters = filter_names(doc, dict);
    trace!(
        "Decoding image {}x{} bpc={} filters={:?}",
        width,
        height,
        bpc,
        filters.iter().map(|f| String::from_utf8_lossy(f).into_owned()).collect::<Vec<_>>()
    );

    let mut raster = match filters.last().map(Vec::as_slice) {
        Some(b"DCTDecode") => {
            if filters.len() > 1 {
                return Err(DecodeError::new("filter chains ending in DCTDecode are not supported"));
            }
            let img = image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
                .map_err(|e| DecodeError::new(format!("JPEG decode failed: {e}")))?;
            RasterImage::from_dynamic(img)?
        }
        Some(name @ (b"JPXDecode" | b"JBIG2Decode" | b"CCITTFaxDecode")) => {
            return Err(DecodeError::new(format!(
                "unsupported filter {}",
                String::from_utf8_lossy(name)
            )));
        }
        _ => {
            let data = if filters.is_empty() {
                stream.content.clone()
            } else {
                stream
                    .decompressed_content()
                    .map_err(|e| DecodeError::new(format!("stream decompression failed: {e}")))?
            };
            let space = match dict.get(b"ColorSpace") {
                Ok(obj) => color_space(doc, obj)?,
                Err(_) => return Err(DecodeError::new("image has no ColorSpace")),
            };
            decode_samples(&data, width, height, bpc, &space, decode_inverted(doc, dict))?
        }
    };

    if with_mask {
        if let Ok(Object::Reference(mask_id)) = dict.get(b"SMask") {
            let mask = doc
                .get_object(*mask_id)
                .and_then(Object::as_stream)
                .map_err(|e| DecodeError::new(format!("soft mask unreadable: {e}")))?;
            let mask = decode_stream(doc, mask, false)?;
            if mask.color != ColorModel::Gray {
                return Err(DecodeError::new("soft mask must be DeviceGray"));
            }
            let (mw, mh) = (mask.width, mask.height);
            let gray = GrayImage::from_raw(mw, mh, mask.samples)
                .ok_or_else(|| DecodeError::new("soft mask buffer does not match dimensions"))?;
            raster = raster.with_alpha(gray)?;
        }
    }

    Ok(raster)
}

fn decode_samples(
    data: &[u8],
    width: u32,
    height: u32,
    bpc: u8,
    space: &PdfColorSpace,
    inverted: bool,
) -> Result<RasterImage, DecodeError> {
    match space {
        PdfColorSpace::Device(model) => {
            let mut samples = unpack(data, width as usize, height as usize, model.components(), bpc, true)?;
            if inverted {
                samples.iter_mut().for_each(|s| *s = 255 - *s);
            }
            RasterImage::new(width, height, *model, false, samples)
        }
        PdfColorSpace::Indexed { base, hival, lookup } => {
            let indices = unpack(data, width as usize, height as usize, 1, bpc, false)?;
            let n = base.components();
            let mut samples = Vec::with_capacity(indices.len() * n);
            for idx in indices {
                let i = usize::from(idx).min(*hival) * n;
                let entry = lookup
                    .get(i..i + n)
                    .ok_or_else(|| DecodeError::new("palette lookup table is too short"))?;
                samples.extend_from_slice(entry);
            }
            RasterImage::new(width, height, *base, false, samples)
        }
    }
}

/// Unpack row-padded samples into one byte per sample.
///
/// With `scale` set, sub-byte values are stretched to 0–255; otherwise they
/// are returned raw (palette indices).
fn unpack(data: &[u8], width: usize, height: usize, comps: usize, bpc: u8, scale: bool) -> Result<Vec<u8>, DecodeError> {
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(DecodeError::new(format!("unsupported BitsPerComponent {bpc}")));
    }
    let per_row = checked_product(&[width, comps])?;
    let row_bytes = checked_product(&[per_row, usize::from(bpc)])?.div_ceil(8);
    let needed = checked_product(&[row_bytes, height])?;
    if data.len() < needed {
        return Err(DecodeError::new(format!(
            "image data is {} bytes, expected at least {}",
            data.len(),
            needed
        )));
    }

    let mut out = Vec::with_capacity(per_row * height);
    for row in data[..needed].chunks_exact(row_bytes) {
        match bpc {
            8 => out.extend_from_slice(&row[..per_row]),
            16 => out.extend(row.chunks_exact(2).take(per_row).map(|pair| pair[0])),
            _ => {
                let bits = usize::from(bpc);
                let max = (1u16 << bits) - 1;
                for i in 0..per_row {
                    let bit = i * bits;
                    let shift = 8 - bits - bit % 8;
                    let v = u16::from(row[bit / 8] >> shift) & max;
                    out.push(if scale { (v * 255 / max) as u8 } else { v as u8 });
                }
            }
        }
    }
    Ok(out)
}

/// Multiply image dimensions, failing instead of overflowing on absurd sizes.
fn checked_product(factors: &[usize]) -> Result<usize, DecodeError> {
    factors
        .iter()
        .try_fold(1usize, |acc, &f| acc.checked_mul(f))
        .ok_or_else(|| DecodeError::new(format!("image dimensions {factors:?} are too large")))
}

fn color_space(doc: &Document, obj: &Object) -> Result<PdfColorSpace, DecodeError> {
    match resolve(doc, obj) {
        Object::Name(name) => device_model(name).map(PdfColorSpace::Device),
        Object::Array(items) => {
            let family = items
                .first()
                .and_then(|o| resolve(doc, o).as_name().ok())
                .ok_or_else(|| DecodeError::new("colour space array has no family name"))?;
            match family {
                b"ICCBased" => {
                    let icc = items
                        .get(1)
                        .map(|o| resolve(doc, o))
                        .and_then(|o| o.as_stream().ok())
                        .ok_or_else(|| DecodeError::new("ICCBased colour space without profile stream"))?;
                    match icc.dict.get(b"N").ok().and_then(|n| n.as_i64().ok()) {
                        Some(1) => Ok(PdfColorSpace::Device(ColorModel::Gray)),
                        Some(3) => Ok(PdfColorSpace::Device(ColorModel::Rgb)),
                        Some(4) => Ok(PdfColorSpace::Device(ColorModel::Cmyk)),
                        _ => match icc.dict.get(b"Alternate") {
                            Ok(alt) => color_space(doc, alt),
                            Err(_) => Err(DecodeError::new("ICCBased profile has no usable /N")),
                        },
                    }
                }
                b"CalGray" | b"CalRGB" | b"CalCMYK" => device_model(family).map(PdfColorSpace::Device),
                b"Indexed" | b"I" => {
                    let base = match items.get(1).map(|o| color_space(doc, o)) {
                        Some(Ok(PdfColorSpace::Device(model))) => model,
                        _ => return Err(DecodeError::new("Indexed colour space has an unusable base")),
                    };
                    let hival = items
                        .get(2)
                        .and_then(|o| resolve(doc, o).as_i64().ok())
                        .ok_or_else(|| DecodeError::new("Indexed colour space without hival"))?
                        .clamp(0, 255) as usize;
                    let lookup = match items.get(3).map(|o| resolve(doc, o)) {
                        Some(Object::String(bytes, _)) => bytes.clone(),
                        Some(Object::Stream(s)) => s.decompressed_content().unwrap_or_else(|_| s.content.clone()),
                        _ => return Err(DecodeError::new("Indexed colour space without lookup table")),
                    };
                    Ok(PdfColorSpace::Indexed { base, hival, lookup })
                }
                other => Err(DecodeError::new(format!(
                    "unsupported colour space {}",
                    String::from_utf8_lossy(other)
                ))),
            }
        }
        _ => Err(DecodeError::new("malformed ColorSpace entry")),
    }
}

fn device_model(name: &[u8]) -> Result<ColorModel, DecodeError> {
    match name {
        b"DeviceGray" | b"CalGray" | b"G" => Ok(ColorModel::Gray),
        b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(ColorModel::Rgb),
        b"DeviceCMYK" | b"CalCMYK" | b"CMYK" => Ok(ColorModel::Cmyk),
        other => Err(DecodeError::new(format!(
            "unsupported colour space {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn filter_names(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter").map(|o| resolve(doc, o)) {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| resolve(doc, o).as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

/// `/Decode [1 0 …]` flips every component.
fn decode_inverted(doc: &Document, dict: &Dictionary) -> bool {
    let Ok(Object::Array(items)) = dict.get(b"Decode").map(|o| resolve(doc, o)) else {
        return false;
    };
    let num = |o: Option<&Object>| match o {
        Some(Object::Integer(i)) => Some(*i as f64),
        Some(Object::Real(r)) => Some(f64::from(*r)),
        _ => None,
    };
    matches!((num(items.first()), num(items.get(1))), (Some(lo), Some(hi)) if lo > hi)
}

fn positive_int(doc: &Document, dict: &Dictionary, key: &[u8]) -> Result<u32, DecodeError> {
    let v = dict
        .get(key)
        .ok()
        .and_then(|o| resolve(doc, o).as_i64().ok())
        .ok_or_else(|| DecodeError::new(format!("image has no {}", String::from_utf8_lossy(key))))?;
    u32::try_from(v)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| DecodeError::new(format!("invalid {} {v}", String::from_utf8_lossy(key))))
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    doc.dereference(obj).map(|(_, o)| o).unwrap_or(obj)
}
