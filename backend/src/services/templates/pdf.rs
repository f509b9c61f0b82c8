//! PDF export of rendered documents with genpdf.
//!
//! Export happens in two steps. `layout` turns a document and branding into
//! a flat list of [`Block`]s: a deterministic plan with every page setting
//! resolved. `export` feeds that plan to genpdf. The exporter reads only the
//! font files and the logo from local disk.

use super::document::{Document, SectionBody};
use crate::config::{PageOptions, PageSize};
use crate::error::RenderError;
use common::model::template::Branding;
use genpdf::elements::{Break, FrameCellDecorator, Image as PdfImage, LinearLayout, Paragraph, TableLayout};
use genpdf::style::{Color, Style, StyledString};
use genpdf::{Alignment, Element as _, PaperSize, SimplePageDecorator};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use png::{BitDepth as PngBitDepth, ColorType as PngColorType, Encoder as PngEncoder};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const IMAGE_DPI: f64 = 150.0;
const LOGO_MAX_WIDTH_PX: f64 = 300.0;
const LOGO_MAX_HEIGHT_PX: f64 = 120.0;
const BAR_WIDTH: usize = 40;
const FALLBACK_FONT: &str = "LiberationSans";

/// Turns a rendered document into a binary artifact.
pub trait Exporter: Send + Sync {
    fn export(&self, document: &Document, branding: &Branding) -> Result<Vec<u8>, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub text: String,
    pub style: TextStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Logo(PathBuf),
    Title { text: String, subtitle: String },
    Heading(String),
    Paragraph(Vec<TextSegment>),
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        note: Option<String>,
    },
    Bar { label: String, filled: usize, display: String },
    Metric { label: String, value: String },
    Placeholder(String),
    Spacer,
}

/// Everything genpdf needs, fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    pub paper: PageSize,
    pub margins_mm: u32,
    pub font_family: String,
    pub color: (u8, u8, u8),
    pub company_name: String,
    pub title: String,
    pub blocks: Vec<Block>,
}

pub struct PdfExporter {
    options: PageOptions,
}

/// Parses `#rrggbb` or `#rgb`.
pub fn parse_color(raw: &str) -> Option<(u8, u8, u8)> {
    let hex = raw.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        6 => Some((channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?)),
        3 => {
            let expand = |i: usize| channel(&hex[i..i + 1]).map(|v| v * 17);
            Some((expand(0)?, expand(1)?, expand(2)?))
        }
        _ => None,
    }
}

/// Splits `***bold italic***`, `**bold**` and `*italic*` runs. An unmatched
/// marker is kept as literal text.
pub fn parse_styles(line: &str) -> Vec<TextSegment> {
    let markers = [("***", TextStyle::BoldItalic), ("**", TextStyle::Bold), ("*", TextStyle::Italic)];
    let mut segments: Vec<TextSegment> = Vec::new();
    let mut plain = String::new();
    let mut rest = line;

    'outer: while !rest.is_empty() {
        for (marker, style) in markers {
            if let Some(after) = rest.strip_prefix(marker) {
                if let Some(end) = after.find(marker).filter(|&end| end > 0) {
                    if !plain.is_empty() {
                        segments.push(TextSegment {
                            text: std::mem::take(&mut plain),
                            style: TextStyle::Regular,
                        });
                    }
                    segments.push(TextSegment {
                        text: after[..end].to_string(),
                        style,
                    });
                    rest = &after[end + marker.len()..];
                    continue 'outer;
                }
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            plain.push(c);
        }
        rest = chars.as_str();
    }
    if !plain.is_empty() {
        segments.push(TextSegment {
            text: plain,
            style: TextStyle::Regular,
        });
    }
    segments
}

fn paper_size(size: PageSize) -> PaperSize {
    match size {
        PageSize::Letter => PaperSize::Letter,
        PageSize::A4 => PaperSize::A4,
        PageSize::Legal => PaperSize::Legal,
    }
}

fn segment_style(style: TextStyle) -> Style {
    match style {
        TextStyle::Regular => Style::new(),
        TextStyle::Bold => Style::new().bold(),
        TextStyle::Italic => Style::new().italic(),
        TextStyle::BoldItalic => Style::new().bold().italic(),
    }
}

fn push_segments_into_paragraph(p: &mut Paragraph, segments: &[TextSegment]) {
    for seg in segments {
        p.push(StyledString::new(seg.text.clone(), segment_style(seg.style)));
    }
}

/// Rescales the logo to fit the header box, flattens alpha over white and
/// writes it as an 8-bit RGB PNG that genpdf can embed.
fn prepare_logo(path: &Path) -> Result<NamedTempFile, RenderError> {
    let bytes = std::fs::read(path)
        .map_err(|e| RenderError::Asset(format!("logo {}: {}", path.display(), e)))?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| RenderError::Asset(format!("logo {}: {}", path.display(), e)))?;

    let (orig_w, orig_h) = img.dimensions();
    let scale = (LOGO_MAX_WIDTH_PX / orig_w as f64)
        .min(LOGO_MAX_HEIGHT_PX / orig_h as f64)
        .min(1.0);
    let resized: DynamicImage = if scale >= 1.0 {
        img
    } else {
        let new_w = (orig_w as f64 * scale).max(1.0).round() as u32;
        let new_h = (orig_h as f64 * scale).max(1.0).round() as u32;
        img.resize(new_w, new_h, FilterType::Lanczos3)
    };

    let rgba = resized.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut background = image::RgbaImage::from_pixel(w, h, image::Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut background, &rgba, 0, 0);
    let raw = DynamicImage::ImageRgba8(background).to_rgb8().into_raw();

    let asset_err = |e: String| RenderError::Asset(format!("logo encoding: {}", e));
    let mut tmp = NamedTempFile::new().map_err(|e| asset_err(e.to_string()))?;
    {
        let mut encoder = PngEncoder::new(tmp.as_file_mut(), w, h);
        encoder.set_color(PngColorType::Rgb);
        encoder.set_depth(PngBitDepth::Eight);
        let mut writer = encoder.write_header().map_err(|e| asset_err(e.to_string()))?;
        writer.write_image_data(&raw).map_err(|e| asset_err(e.to_string()))?;
    }
    Ok(tmp)
}

impl PdfExporter {
    pub fn new(options: PageOptions) -> Self {
        Self { options }
    }

    /// Builds the page plan. Pure.
    pub fn layout(&self, document: &Document, branding: &Branding) -> Result<PagePlan, RenderError> {
        let color = parse_color(&branding.primary_color).ok_or_else(|| {
            RenderError::MalformedTemplate(format!("invalid primary color '{}'", branding.primary_color))
        })?;

        let mut blocks = Vec::new();
        if let Some(logo) = &branding.logo_path {
            blocks.push(Block::Logo(PathBuf::from(logo)));
        }
        blocks.push(Block::Title {
            text: document.title.clone(),
            subtitle: format!(
                "{} | generated {}",
                document.period,
                document.generated_at.format("%Y-%m-%d %H:%M UTC")
            ),
        });

        for section in &document.sections {
            blocks.push(Block::Heading(section.title.clone()));
            match &section.body {
                SectionBody::Table { headers, rows, omitted } => blocks.push(Block::Table {
                    headers: headers.clone(),
                    rows: rows.clone(),
                    note: (*omitted > 0).then(|| format!("{} more rows not shown", omitted)),
                }),
                SectionBody::Chart { points, .. } => {
                    let max = points.iter().map(|p| p.value).fold(0.0_f64, f64::max);
                    for point in points {
                        let filled = if max > 0.0 && point.value > 0.0 {
                            ((point.value / max) * BAR_WIDTH as f64).round() as usize
                        } else {
                            0
                        };
                        blocks.push(Block::Bar {
                            label: point.label.clone(),
                            filled,
                            display: point.display.clone(),
                        });
                    }
                }
                SectionBody::Text { paragraphs } => {
                    blocks.extend(paragraphs.iter().map(|p| Block::Paragraph(parse_styles(p))));
                }
                SectionBody::Metrics { items } => {
                    blocks.extend(items.iter().map(|m| Block::Metric {
                        label: m.label.clone(),
                        value: m.value.clone(),
                    }));
                }
                SectionBody::Placeholder { message } => blocks.push(Block::Placeholder(message.clone())),
            }
            blocks.push(Block::Spacer);
        }

        Ok(PagePlan {
            paper: self.options.page_size,
            margins_mm: self.options.margins_mm,
            font_family: branding
                .font_family
                .clone()
                .unwrap_or_else(|| self.options.font_family.clone()),
            color,
            company_name: branding.company_name.clone(),
            title: document.title.clone(),
            blocks,
        })
    }

    /// Loads the configured family, falling back to LiberationSans in the same directory.
    fn load_font(&self, family: &str) -> Result<genpdf::fonts::FontFamily<genpdf::fonts::FontData>, RenderError> {
        let dir = &self.options.font_dir;
        match genpdf::fonts::from_files(dir, family, None) {
            Ok(fonts) => Ok(fonts),
            Err(first) if family != FALLBACK_FONT => genpdf::fonts::from_files(dir, FALLBACK_FONT, None)
                .map_err(|_| RenderError::FontMissing {
                    dir: dir.display().to_string(),
                    family: family.to_string(),
                    cause: first.to_string(),
                }),
            Err(e) => Err(RenderError::FontMissing {
                dir: dir.display().to_string(),
                family: family.to_string(),
                cause: e.to_string(),
            }),
        }
    }

    fn build(&self, plan: &PagePlan) -> Result<(genpdf::Document, Vec<NamedTempFile>), RenderError> {
        let mut doc = genpdf::Document::new(self.load_font(&plan.font_family)?);
        doc.set_title(plan.title.clone());
        doc.set_paper_size(paper_size(plan.paper));
        doc.set_font_size(10);
        doc.set_line_spacing(1.25);

        let (r, g, b) = plan.color;
        let accent = Style::new().with_color(Color::Rgb(r, g, b));

        let mut decorator = SimplePageDecorator::new();
        decorator.set_margins(plan.margins_mm as i32);
        let company = plan.company_name.clone();
        decorator.set_header(move |page| {
            let mut header = LinearLayout::vertical();
            header.push(
                Paragraph::new(format!("{}  |  page {}", company, page))
                    .aligned(Alignment::Right)
                    .styled(accent.with_font_size(8)),
            );
            header.push(Break::new(1));
            header
        });
        doc.set_page_decorator(decorator);

        let mut temp_files = Vec::new();
        for block in &plan.blocks {
            match block {
                Block::Logo(path) => {
                    let tmp = prepare_logo(path)?;
                    let mut logo = PdfImage::from_path(tmp.path())?;
                    logo.set_dpi(IMAGE_DPI);
                    temp_files.push(tmp);
                    doc.push(logo.with_alignment(Alignment::Left));
                }
                Block::Title { text, subtitle } => {
                    doc.push(Paragraph::new(text.as_str()).styled(accent.bold().with_font_size(18)));
                    doc.push(Paragraph::new(subtitle.as_str()).styled(Style::new().italic().with_font_size(9)));
                    doc.push(Break::new(1));
                }
                Block::Heading(text) => {
                    doc.push(Paragraph::new(text.as_str()).styled(accent.bold().with_font_size(13)));
                }
                Block::Paragraph(segments) => {
                    let mut p = Paragraph::new("");
                    push_segments_into_paragraph(&mut p, segments);
                    doc.push(p);
                }
                Block::Table { headers, rows, note } => {
                    if headers.is_empty() {
                        doc.push(Paragraph::new("(no columns)").styled(Style::new().italic()));
                        continue;
                    }
                    let mut table = TableLayout::new(vec![1; headers.len()]);
                    table.set_cell_decorator(FrameCellDecorator::new(true, true, false));
                    let mut row = table.row();
                    for h in headers {
                        row.push_element(Paragraph::new(h.as_str()).styled(accent.bold()).padded(1));
                    }
                    row.push()?;
                    for cells in rows {
                        let mut row = table.row();
                        for cell in cells {
                            row.push_element(Paragraph::new(cell.as_str()).padded(1));
                        }
                        row.push()?;
                    }
                    doc.push(table);
                    if let Some(note) = note {
                        doc.push(Paragraph::new(note.as_str()).styled(Style::new().italic().with_font_size(8)));
                    }
                }
                Block::Bar { label, filled, display } => {
                    let mut p = Paragraph::new("");
                    p.push(StyledString::new(format!("{:<16} ", label), Style::new()));
                    p.push(StyledString::new("\u{2588}".repeat(*filled), accent));
                    p.push(StyledString::new(format!(" {}", display), Style::new().with_font_size(8)));
                    doc.push(p);
                }
                Block::Metric { label, value } => {
                    let mut p = Paragraph::new("");
                    p.push(StyledString::new(format!("{}: ", label), Style::new()));
                    p.push(StyledString::new(value.clone(), Style::new().bold()));
                    doc.push(p);
                }
                Block::Placeholder(message) => {
                    doc.push(
                        Paragraph::new(message.as_str())
                            .styled(Style::new().italic().with_color(Color::Greyscale(110))),
                    );
                }
                Block::Spacer => doc.push(Break::new(1)),
            }
        }
        Ok((doc, temp_files))
    }
}

impl Exporter for PdfExporter {
    fn export(&self, document: &Document, branding: &Branding) -> Result<Vec<u8>, RenderError> {
        let plan = self.layout(document, branding)?;
        // Temp files back the embedded logo and must outlive rendering.
        let (doc, _temp_files) = self.build(&plan)?;
        let mut out = Vec::new();
        doc.render(&mut out)?;
        Ok(out)
    }
}
