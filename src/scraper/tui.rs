/*
 * Copyright (c) 2022 McSib
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{error, warn};

/// Template of the per-class bar.
const CLASS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] {msg} [{bar:40.cyan/blue}] {pos}/{len} images";

/// A builder that helps in making a new [ProgressStyle] for use.
pub(crate) struct ProgressStyleBuilder {
    /// The [ProgressStyle] being built.
    progress_style: ProgressStyle,
}

impl ProgressStyleBuilder {
    /// Sets the template of the progress style, falling back to a plain bar when
    /// the template does not parse.
    ///
    /// # Arguments
    ///
    /// * `msg_template`: The template to use.
    pub(crate) fn template(mut self, msg_template: &str) -> Self {
        match self.progress_style.clone().template(msg_template) {
            Ok(style) => self.progress_style = style,
            Err(err) => {
                warn!("Template error with '{}': {}. Using fallback template.", msg_template, err);
                let fallback = "{spinner} [{elapsed_precise}] {bar} {pos}/{len}";

                match self.progress_style.clone().template(fallback) {
                    Ok(style) => self.progress_style = style,
                    Err(e) => {
                        error!("Fallback template also failed: {}. Using default bar.", e);
                        self.progress_style = ProgressStyle::default_bar();
                    }
                }
            }
        }
        self
    }

    /// Sets the progress style chars.
    pub(crate) fn progress_chars(mut self, chars: &str) -> Self {
        self.progress_style = self.progress_style.progress_chars(chars);
        self
    }

    pub(crate) fn build(self) -> ProgressStyle {
        self.progress_style
    }
}

impl Default for ProgressStyleBuilder {
    fn default() -> Self {
        Self {
            progress_style: ProgressStyle::default_bar(),
        }
    }
}

/// A builder that helps in initializing and configuring a new [ProgressBar] for use.
pub(crate) struct ProgressBarBuilder {
    /// The [ProgressBar] to build.
    pub(crate) progress_bar: ProgressBar,
}

impl ProgressBarBuilder {
    /// Creates new instance of the builder.
    ///
    /// # Arguments
    ///
    /// * `len`: Total length of the progress bar.
    pub(crate) fn new(len: u64) -> Self {
        Self {
            progress_bar: ProgressBar::new(len),
        }
    }

    pub(crate) fn style(self, progress_style: ProgressStyle) -> Self {
        self.progress_bar.set_style(progress_style);
        self
    }

    pub(crate) fn draw_target(self, target: ProgressDrawTarget) -> Self {
        self.progress_bar.set_draw_target(target);
        self
    }

    pub(crate) fn message(self, msg: &str) -> Self {
        self.progress_bar.set_message(msg.to_string());
        self
    }

    pub(crate) fn steady_tick(self, duration: Duration) -> Self {
        self.progress_bar.enable_steady_tick(duration);
        self
    }

    /// Returns the newly built progress bar.
    pub(crate) fn build(self) -> ProgressBar {
        self.progress_bar
    }
}

/// Bar counting acquired images of one class up to its quota. Hidden bars
/// still count, they just never draw.
pub(crate) fn class_progress_bar(quota: u64, class_name: &str, visible: bool) -> ProgressBar {
    if !visible {
        let bar = ProgressBar::hidden();
        bar.set_length(quota);
        return bar;
    }

    let style = ProgressStyleBuilder::default()
        .template(CLASS_TEMPLATE)
        .progress_chars("=>-")
        .build();

    ProgressBarBuilder::new(quota)
        .style(style)
        .draw_target(ProgressDrawTarget::stderr())
        .message(class_name)
        .steady_tick(Duration::from_millis(100))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_bar_still_counts() {
        let bar = class_progress_bar(5, "tench", false);
        bar.inc(2);
        assert_eq!(bar.position(), 2);
        assert_eq!(bar.length(), Some(5));
    }

    #[test]
    fn test_bad_template_falls_back() {
        let style = ProgressStyleBuilder::default().template("{bar:}}").build();
        let bar = ProgressBarBuilder::new(3).style(style).build();
        bar.inc(1);
        assert_eq!(bar.position(), 1);
    }
}
