use anyhow::{anyhow, Context, Result};
use image::{ImageBuffer, Rgba};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;

use super::preprocess::rotate_upright;
use super::setup::{find_tessdata_dir, find_tesseract_executable};
use crate::config::ScanConfig;
use crate::geometry::{ImageSize, PixelRect, Rotation};
use crate::log;

/// One block of recognized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    /// Engine confidence, 0.0-1.0
    pub confidence: f64,
    /// Axis-aligned box in the pixel space of the bitmap handed to the engine
    pub bounding_box: PixelRect,
}

/// Raw recognizer output for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub full_text: String,
    pub blocks: Vec<TextBlock>,
}

impl RecognitionResult {
    /// Builds the result from blocks, joining their text line by line.
    pub fn from_blocks(blocks: Vec<TextBlock>) -> Self {
        let full_text = blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self { full_text, blocks }
    }
}

/// A text-recognition capability.
///
/// `rotation` is the clockwise turn that makes the bitmap upright. It
/// describes the original capture and applies even when the bitmap is a
/// crop of that capture.
pub trait TextRecognizer {
    /// Block-level recognition.
    fn recognize(
        &self,
        bitmap: &ImageBuffer<Rgba<u8>, Vec<u8>>,
        rotation: Rotation,
    ) -> Result<RecognitionResult>;

    /// Flattened text only.
    fn recognize_text(
        &self,
        bitmap: &ImageBuffer<Rgba<u8>, Vec<u8>>,
        rotation: Rotation,
    ) -> Result<String> {
        Ok(self.recognize(bitmap, rotation)?.full_text)
    }
}

/// Runs the Tesseract executable on temporary PNG files.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
    language: String,
    page_segmentation_mode: u32,
}

impl TesseractRecognizer {
    /// Locates the engine using the configured paths, then the usual places.
    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        let executable = find_tesseract_executable(config.tesseract_path.as_deref())?;
        let tessdata = find_tessdata_dir(config.tessdata_dir.as_deref(), &config.language);

        log(&format!(
            "Using Tesseract at {} (tessdata: {})",
            executable.display(),
            tessdata
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "engine default".to_string())
        ));

        Ok(Self {
            executable,
            tessdata,
            language: config.language.clone(),
            page_segmentation_mode: config.page_segmentation_mode,
        })
    }

    fn command(&self, input: &Path, output: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(input).arg(output);
        if let Some(tessdata) = &self.tessdata {
            cmd.arg("--tessdata-dir").arg(tessdata);
        }
        cmd.arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(self.page_segmentation_mode.to_string());
        cmd
    }

    /// Saves the upright bitmap where Tesseract can read it.
    fn write_input(
        bitmap: &ImageBuffer<Rgba<u8>, Vec<u8>>,
        rotation: Rotation,
    ) -> Result<NamedTempFile> {
        let upright = rotate_upright(bitmap, rotation);
        let temp_input = NamedTempFile::with_suffix(".png")?;
        upright
            .save(temp_input.path())
            .context("Failed to write OCR input image")?;
        Ok(temp_input)
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(
        &self,
        bitmap: &ImageBuffer<Rgba<u8>, Vec<u8>>,
        rotation: Rotation,
    ) -> Result<RecognitionResult> {
        let temp_input = Self::write_input(bitmap, rotation)?;

        // Tesseract appends .tsv to the output base
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let output = self
            .command(temp_input.path(), &output_base)
            .arg("tsv")
            .output()
            .context("Failed to run Tesseract")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv_content = std::fs::read_to_string(&tsv_path)
            .map_err(|e| anyhow!("Failed to read Tesseract output: {}", e))?;
        let _ = std::fs::remove_file(&tsv_path);

        let (width, height) = bitmap.dimensions();
        let stored = ImageSize::new(width, height);
        let blocks = parse_tsv_blocks(&tsv_content)
            .into_iter()
            .map(|mut block| {
                block.bounding_box = block.bounding_box.from_upright(rotation, stored);
                block
            })
            .collect::<Vec<_>>();

        log(&format!("Tesseract returned {} block(s)", blocks.len()));
        Ok(RecognitionResult::from_blocks(blocks))
    }

    fn recognize_text(
        &self,
        bitmap: &ImageBuffer<Rgba<u8>, Vec<u8>>,
        rotation: Rotation,
    ) -> Result<String> {
        let temp_input = Self::write_input(bitmap, rotation)?;

        let output = self
            .command(temp_input.path(), "stdout")
            .output()
            .context("Failed to run Tesseract")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

/// Word accumulator for one TSV block.
struct BlockBuilder {
    block_num: i32,
    bounding_box: PixelRect,
    text: String,
    last_line: Option<(i32, i32)>,
    conf_sum: f64,
    word_count: usize,
}

impl BlockBuilder {
    fn new(block_num: i32, bounding_box: PixelRect) -> Self {
        Self {
            block_num,
            bounding_box,
            text: String::new(),
            last_line: None,
            conf_sum: 0.0,
            word_count: 0,
        }
    }

    fn push_word(&mut self, line: (i32, i32), text: &str, conf: f64) {
        match self.last_line {
            Some(last) if last == line => self.text.push(' '),
            Some(_) => self.text.push('\n'),
            None => {}
        }
        self.text.push_str(text);
        self.last_line = Some(line);
        self.conf_sum += conf;
        self.word_count += 1;
    }

    fn finish(self) -> Option<TextBlock> {
        if self.word_count == 0 {
            return None;
        }
        let confidence = (self.conf_sum / self.word_count as f64 / 100.0).clamp(0.0, 1.0);
        Some(TextBlock {
            text: self.text,
            confidence,
            bounding_box: self.bounding_box,
        })
    }
}

/// Parses Tesseract TSV output into text blocks.
///
/// Block boxes come from the level-2 rows, text and confidence from the
/// level-5 (word) rows. Words on the same line are joined by spaces, lines
/// by newlines. Boxes are in the coordinates of the image Tesseract saw.
fn parse_tsv_blocks(tsv: &str) -> Vec<TextBlock> {
    let mut builders: Vec<BlockBuilder> = Vec::new();

    for line in tsv.lines().skip(1) {
        // Skip header
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 11 {
            continue;
        }

        // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
        //             left, top, width, height, conf, text
        let level: i32 = fields[0].parse().unwrap_or(-1);
        let block_num: i32 = fields[2].parse().unwrap_or(-1);
        let par_num: i32 = fields[3].parse().unwrap_or(-1);
        let line_num: i32 = fields[4].parse().unwrap_or(-1);
        let bbox = PixelRect::new(
            fields[6].parse().unwrap_or(0),
            fields[7].parse().unwrap_or(0),
            fields[8].parse().unwrap_or(0),
            fields[9].parse().unwrap_or(0),
        );
        let conf: f64 = fields[10].parse().unwrap_or(-1.0);
        let text = fields.get(11).map(|t| t.trim()).unwrap_or("");

        match level {
            // Level 2 = block
            2 => builders.push(BlockBuilder::new(block_num, bbox)),
            // Level 5 = word
            5 if !text.is_empty() && conf >= 0.0 => {
                let needs_block = builders
                    .last()
                    .map_or(true, |b| b.block_num != block_num);
                if needs_block {
                    builders.push(BlockBuilder::new(block_num, bbox));
                }
                if let Some(builder) = builders.last_mut() {
                    builder.push_word((par_num, line_num), text, conf);
                }
            }
            _ => {}
        }
    }

    builders.into_iter().filter_map(BlockBuilder::finish).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = HEADER.to_string();
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn test_parse_single_block() {
        let content = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t200\t100\t-1\t",
            "2\t1\t1\t0\t0\t0\t10\t20\t120\t40\t-1\t",
            "3\t1\t1\t1\t0\t0\t10\t20\t120\t40\t-1\t",
            "4\t1\t1\t1\t1\t0\t10\t20\t120\t40\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t20\t60\t40\t96.5\t12.345",
            "5\t1\t1\t1\t1\t2\t80\t20\t50\t40\t88.5\tmm",
        ]);

        let blocks = parse_tsv_blocks(&content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "12.345 mm");
        assert!((blocks[0].confidence - 0.925).abs() < 1e-9);
        assert_eq!(blocks[0].bounding_box, PixelRect::new(10, 20, 120, 40));
    }

    #[test]
    fn test_parse_lines_and_blocks() {
        let content = tsv(&[
            "2\t1\t1\t0\t0\t0\t0\t0\t100\t50\t-1\t",
            "5\t1\t1\t1\t1\t1\t0\t0\t40\t20\t90\tTHK",
            "5\t1\t1\t1\t2\t1\t0\t25\t40\t20\t80\t4.27",
            "2\t1\t2\t0\t0\t0\t0\t60\t100\t30\t-1\t",
            "5\t1\t2\t1\t1\t1\t0\t60\t40\t30\t70\tCH2",
            // Empty and low-level rows are ignored
            "5\t1\t2\t1\t1\t2\t50\t60\t10\t30\t95\t ",
            "5\t1\t2\t1\t1\t3\t60\t60\t10\t30\t-1\t~",
        ]);

        let result = RecognitionResult::from_blocks(parse_tsv_blocks(&content));
        assert_eq!(result.blocks.len(), 2);
        assert_eq!(result.blocks[0].text, "THK\n4.27");
        assert_eq!(result.blocks[1].text, "CH2");
        assert!((result.blocks[1].confidence - 0.7).abs() < 1e-9);
        assert_eq!(result.full_text, "THK\n4.27\nCH2");
    }

    #[test]
    fn test_parse_blocks_without_words_are_dropped() {
        let content = tsv(&["2\t1\t1\t0\t0\t0\t0\t0\t100\t50\t-1\t"]);
        assert!(parse_tsv_blocks(&content).is_empty());
    }

    #[test]
    fn test_parse_word_without_block_row() {
        let content = tsv(&["5\t1\t3\t1\t1\t1\t5\t6\t7\t8\t50\t42"]);
        let blocks = parse_tsv_blocks(&content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].bounding_box, PixelRect::new(5, 6, 7, 8));
        assert_eq!(blocks[0].confidence, 0.5);
    }

    #[test]
    fn test_parse_malformed_rows() {
        let content = tsv(&["garbage", "5\t1\t1", ""]);
        assert!(parse_tsv_blocks(&content).is_empty());
    }

    struct EchoRecognizer;

    impl TextRecognizer for EchoRecognizer {
        fn recognize(
            &self,
            bitmap: &ImageBuffer<Rgba<u8>, Vec<u8>>,
            rotation: Rotation,
        ) -> Result<RecognitionResult> {
            let (w, h) = bitmap.dimensions();
            Ok(RecognitionResult::from_blocks(vec![TextBlock {
                text: format!("{}x{}@{}", w, h, rotation.degrees()),
                confidence: 1.0,
                bounding_box: PixelRect::new(0, 0, w, h),
            }]))
        }
    }

    #[test]
    fn test_default_recognize_text_flattens_blocks() {
        let bitmap: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::new(3, 2);
        let text = EchoRecognizer
            .recognize_text(&bitmap, Rotation::Deg90)
            .unwrap();
        assert_eq!(text, "3x2@90");
    }
}
