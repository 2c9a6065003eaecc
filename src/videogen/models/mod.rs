pub mod veo3;
