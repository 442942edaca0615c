//! Image Studio Demo Client
//!
//! Drives the Image Studio service from the command line: engineer prompts,
//! generate images, edit local files, and run an interactive session that
//! chains edits on the latest artifact.

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use atelier_shared::{
    ApiErrorBody, EditImageResponse, EngineerPromptResponse, GenerateImageResponse, ImageArtifact,
    PromptRole,
};

#[derive(Parser, Debug)]
#[command(
    name = "studio-demo",
    version,
    about = "Command line client for the Image Studio service"
)]
struct Cli {
    /// Base URL of the Image Studio service
    #[arg(long, default_value = "http://127.0.0.1:8087", env = "IMAGE_STUDIO_URL")]
    service_url: String,

    /// Directory where generated and edited images are saved
    #[arg(long, default_value = "studio-output")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rewrite an instruction into an engineered prompt without an image
    Engineer {
        instruction: String,

        /// Rewrite role: generation or editing (generate/edit also accepted)
        #[arg(long, default_value = "generation")]
        role: PromptRole,
    },
    /// Generate an image from an instruction
    Generate {
        instruction: String,

        #[arg(long)]
        steps: Option<u32>,

        #[arg(long)]
        guidance_scale: Option<f32>,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,
    },
    /// Edit a local image file with an instruction
    Edit {
        image: PathBuf,
        instruction: String,

        /// How strongly the edit departs from the source, in (0, 1]
        #[arg(long)]
        strength: Option<f32>,

        #[arg(long)]
        guidance_scale: Option<f32>,
    },
    /// Interactive session chaining generations and edits
    Session,
}

/// Thin client over the studio HTTP API.
struct StudioClient {
    http: reqwest::Client,
    base_url: String,
}

impl StudioClient {
    fn new(base_url: &str) -> Result<Self> {
        // Diffusion runs can take minutes on CPU-only hosts
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn engineer(
        &self,
        instruction: &str,
        role: PromptRole,
    ) -> Result<EngineerPromptResponse> {
        let response = self
            .http
            .post(format!("{}/v1/prompts/engineer", self.base_url))
            .json(&json!({"instruction": instruction, "role": role}))
            .send()
            .await
            .context("Request to the studio service failed")?;
        Self::parse_response(response).await
    }

    async fn generate(
        &self,
        instruction: &str,
        steps: Option<u32>,
        guidance_scale: Option<f32>,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<GenerateImageResponse> {
        let response = self
            .http
            .post(format!("{}/v1/images/generate", self.base_url))
            .json(&json!({
                "instruction": instruction,
                "steps": steps,
                "guidance_scale": guidance_scale,
                "width": width,
                "height": height,
            }))
            .send()
            .await
            .context("Request to the studio service failed")?;
        Self::parse_response(response).await
    }

    async fn edit_file(
        &self,
        image: &Path,
        instruction: &str,
        strength: Option<f32>,
        guidance_scale: Option<f32>,
    ) -> Result<EditImageResponse> {
        let bytes = tokio::fs::read(image)
            .await
            .with_context(|| format!("Failed to read {}", image.display()))?;
        let file_name = image
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.png")
            .to_string();

        let mut form = reqwest::multipart::Form::new()
            .part(
                "image",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("application/octet-stream")
                    .context("Invalid upload mime type")?,
            )
            .text("instruction", instruction.to_string());
        if let Some(strength) = strength {
            form = form.text("strength", strength.to_string());
        }
        if let Some(guidance_scale) = guidance_scale {
            form = form.text("guidance_scale", guidance_scale.to_string());
        }

        let response = self
            .http
            .post(format!("{}/v1/images/edit", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("Request to the studio service failed")?;
        Self::parse_response(response).await
    }

    async fn edit_generated(
        &self,
        image_b64: &str,
        instruction: &str,
    ) -> Result<EditImageResponse> {
        let response = self
            .http
            .post(format!("{}/v1/images/edit-generated", self.base_url))
            .json(&json!({
                "image_b64": image_b64,
                "instruction": instruction,
            }))
            .send()
            .await
            .context("Request to the studio service failed")?;
        Self::parse_response(response).await
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .context("Invalid response from the studio service");
        }
        match response.json::<ApiErrorBody>().await {
            Ok(err) => bail!("{} ({}): {}", err.error, status, err.message),
            Err(_) => bail!("Studio service returned {}", status),
        }
    }
}

/// The one artifact slot an interactive session works on.
struct SessionImage {
    image_b64: String,
    instruction: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studio_demo=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let client = StudioClient::new(&cli.service_url)?;

    match cli.command {
        Command::Engineer { instruction, role } => {
            let response = client.engineer(&instruction, role).await?;
            println!("Role:  {}", response.role);
            println!("Model: {}", response.model);
            println!();
            println!("{}", response.engineered_prompt);
        }
        Command::Generate {
            instruction,
            steps,
            guidance_scale,
            width,
            height,
        } => {
            let response = client
                .generate(&instruction, steps, guidance_scale, width, height)
                .await?;
            println!("Engineered prompt:");
            println!("  {}", response.engineered_prompt);
            let path = save_artifact(&cli.output_dir, &instruction, &response.image_b64).await?;
            println!(
                "Saved {}x{} image to {} ({} ms)",
                response.width,
                response.height,
                path.display(),
                response.processing_time_ms
            );
        }
        Command::Edit {
            image,
            instruction,
            strength,
            guidance_scale,
        } => {
            let response = client
                .edit_file(&image, &instruction, strength, guidance_scale)
                .await?;
            println!("Engineered instruction:");
            println!("  {}", response.engineered_instruction);
            let path = save_artifact(&cli.output_dir, &instruction, &response.image_b64).await?;
            println!(
                "Saved edited image to {} ({} ms)",
                path.display(),
                response.processing_time_ms
            );
        }
        Command::Session => run_session(&client, &cli.output_dir).await?,
    }

    Ok(())
}

async fn run_session(client: &StudioClient, output_dir: &Path) -> Result<()> {
    println!("Image Studio session. Commands:");
    println!("  gen <instruction>    generate a fresh image");
    println!("  edit <instruction>   edit the current image");
    println!("  load <path>          load a local image into the session");
    println!("  save                 write the current image to disk");
    println!("  show                 print current image info");
    println!("  quit                 exit");

    let mut current: Option<SessionImage> = None;
    let stdin = io::stdin();

    loop {
        print!("studio> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "" => continue,
            "gen" => {
                if rest.is_empty() {
                    println!("Usage: gen <instruction>");
                    continue;
                }
                match client.generate(rest, None, None, None, None).await {
                    Ok(response) => {
                        println!("Engineered prompt: {}", response.engineered_prompt);
                        println!(
                            "Image ready ({}x{}). Use `edit` to refine or `save` to keep it.",
                            response.width, response.height
                        );
                        current = Some(SessionImage {
                            image_b64: response.image_b64,
                            instruction: rest.to_string(),
                        });
                    }
                    Err(e) => println!("Generation failed: {:#}", e),
                }
            }
            "edit" => {
                if rest.is_empty() {
                    println!("Usage: edit <instruction>");
                    continue;
                }
                let Some(image) = current.as_ref() else {
                    println!("No image in the session yet. `gen` or `load` one first.");
                    continue;
                };
                match client.edit_generated(&image.image_b64, rest).await {
                    Ok(response) => {
                        println!(
                            "Engineered instruction: {}",
                            response.engineered_instruction
                        );
                        current = Some(SessionImage {
                            image_b64: response.image_b64,
                            instruction: rest.to_string(),
                        });
                    }
                    Err(e) => println!("Edit failed: {:#}", e),
                }
            }
            "load" => {
                if rest.is_empty() {
                    println!("Usage: load <path>");
                    continue;
                }
                match load_image(rest).await {
                    Ok(image) => {
                        println!("Loaded {} into the session.", rest);
                        current = Some(image);
                    }
                    Err(e) => println!("Load failed: {:#}", e),
                }
            }
            "save" => {
                let Some(image) = current.as_ref() else {
                    println!("Nothing to save yet.");
                    continue;
                };
                match save_artifact(output_dir, &image.instruction, &image.image_b64).await {
                    Ok(path) => println!("Saved to {}", path.display()),
                    Err(e) => println!("Save failed: {:#}", e),
                }
            }
            "show" => match current.as_ref() {
                Some(image) => match ImageArtifact::from_base64(&image.image_b64) {
                    Ok(artifact) => println!(
                        "Current image: {}x{} from \"{}\"",
                        artifact.width(),
                        artifact.height(),
                        image.instruction
                    ),
                    Err(e) => println!("Current image is corrupt: {}", e),
                },
                None => println!("No image in the session yet."),
            },
            "quit" | "exit" => break,
            other => println!("Unknown command: {}", other),
        }
    }

    println!("Session closed.");
    Ok(())
}

async fn load_image(path: &str) -> Result<SessionImage> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let artifact = ImageArtifact::from_bytes(&bytes).context("Not a decodable image")?;
    debug!(path, "Loaded local image");
    Ok(SessionImage {
        image_b64: artifact.to_base64_png()?,
        instruction: Path::new(path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("image")
            .to_string(),
    })
}

async fn save_artifact(output_dir: &Path, instruction: &str, image_b64: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let artifact =
        ImageArtifact::from_base64(image_b64).context("Service returned an undecodable image")?;
    let filename = format!(
        "{}_{}.png",
        sanitize_stem(instruction),
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    let path = output_dir.join(filename);
    tokio::fs::write(&path, artifact.to_png_bytes()?)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Filename stem derived from the instruction: lowercase alphanumerics with
/// underscores, capped at 40 characters.
fn sanitize_stem(instruction: &str) -> String {
    let mapped: String = instruction
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    let mut stem = mapped
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    stem.truncate(40);

    if stem.is_empty() {
        "image".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_stem_flattens_punctuation() {
        assert_eq!(
            sanitize_stem("A cat, wearing a hat!"),
            "a_cat_wearing_a_hat"
        );
    }

    #[test]
    fn sanitize_stem_caps_length_and_handles_empty() {
        let stem = sanitize_stem(&"long instruction ".repeat(10));
        assert!(stem.len() <= 40);
        assert_eq!(sanitize_stem("!!!"), "image");
    }

    #[test]
    fn role_argument_accepts_aliases() {
        let cli = Cli::parse_from(["studio-demo", "engineer", "a cat", "--role", "edit"]);
        match cli.command {
            Command::Engineer { role, .. } => assert_eq!(role, PromptRole::Editing),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
