use std::collections::VecDeque;

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph, Wrap};
use ratatui::{Frame, symbols};

use crate::app::AppState;
use crate::constants::POINT2_TARGET_FLOW;
use crate::interface::InterfaceMode;

pub fn render_ui(frame: &mut Frame, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Length(12),
            Constraint::Length(6),
            Constraint::Min(4),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0]);
    render_status(frame, chunks[1], app);
    render_flow_chart(frame, chunks[2], app);
    render_panels(frame, chunks[3], app);
    render_log(frame, chunks[4], app);
    render_help(frame, chunks[5]);
}

fn render_header(frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![Span::styled(
        "Insufflator Valve Tuner",
        Style::default()
            .fg(Color::LightMagenta)
            .add_modifier(Modifier::BOLD),
    )]);

    let paragraph = Paragraph::new(title).alignment(ratatui::layout::Alignment::Center);
    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, app: &AppState) {
    let (connection_text, connection_style) = if app.connected {
        (
            "Connected",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        (
            "Disconnected",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    };
    let (run_text, run_style) = if app.running {
        (
            "RUNNING",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        ("STOPPED", Style::default().fg(Color::Gray))
    };
    let mode_color = match app.interface {
        InterfaceMode::Simulation => Color::Yellow,
        InterfaceMode::Serial => Color::Blue,
    };

    let line = Line::from(vec![
        Span::styled("Link: ", Style::default().fg(Color::Gray)),
        Span::styled(connection_text, connection_style),
        Span::raw("  "),
        Span::styled("Run: ", Style::default().fg(Color::Gray)),
        Span::styled(run_text, run_style),
        Span::raw("  "),
        Span::styled("Phase: ", Style::default().fg(Color::Gray)),
        Span::raw(app.phase),
        Span::raw("  "),
        Span::styled("Mode: ", Style::default().fg(Color::Gray)),
        Span::styled(
            app.interface.label(),
            Style::default().fg(mode_color).add_modifier(Modifier::BOLD),
        ),
    ]);

    let paragraph = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Status")
            .border_style(Style::default().fg(Color::LightMagenta)),
    );
    frame.render_widget(paragraph, area);
}

fn render_flow_chart(frame: &mut Frame, area: Rect, app: &AppState) {
    let flow_data: Vec<(f64, f64)> = app.flow_history.iter().copied().collect();
    let target_data: Vec<(f64, f64)> = app.target_history.iter().copied().collect();
    let (min_tick, max_tick) = chart_bounds(&flow_data, area);
    let max_flow = series_max(&app.flow_history)
        .max(series_max(&app.target_history))
        .max(POINT2_TARGET_FLOW)
        .ceil();

    let datasets = vec![
        Dataset::default()
            .name("Target")
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::LightYellow))
            .graph_type(GraphType::Line)
            .data(&target_data),
        Dataset::default()
            .name("Measured")
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::LightCyan))
            .graph_type(GraphType::Line)
            .data(&flow_data),
    ];

    let chart_title = Line::from(vec![
        Span::styled("Flow (l/min)", Style::default().fg(Color::White)),
        Span::raw("  "),
        Span::styled("Measured", Style::default().fg(Color::LightCyan)),
        Span::raw("/"),
        Span::styled("Target", Style::default().fg(Color::LightYellow)),
    ]);

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(chart_title)
                .border_style(Style::default().fg(Color::LightCyan)),
        )
        .x_axis(
            Axis::default()
                .bounds([min_tick, max_tick])
                .labels(vec![Span::from("-"), Span::from("+")]),
        )
        .y_axis(
            Axis::default()
                .bounds([0.0, max_flow])
                .labels(vec![Span::from("0"), Span::from(format!("{max_flow:.0}"))]),
        );

    frame.render_widget(chart, area);
}

fn render_panels(frame: &mut Frame, area: Rect, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    render_values(frame, chunks[0], app);
    render_calibration(frame, chunks[1], app);
}

fn render_values(frame: &mut Frame, area: Rect, app: &AppState) {
    let (pwm, flow, error) = app.measurement.map_or_else(
        || ("--".to_string(), "--".to_string(), "--".to_string()),
        |m| {
            (
                m.pwm.to_string(),
                format!("{:.2}", m.flow),
                m.error.map_or_else(|| "--".to_string(), |e| format!("{e:+.2}")),
            )
        },
    );

    let lines = vec![
        labelled("PWM:   ", pwm),
        labelled("Flow:  ", flow),
        labelled("Error: ", error),
    ];
    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Controller")
            .border_style(Style::default().fg(Color::LightGreen)),
    );
    frame.render_widget(paragraph, area);
}

fn render_calibration(frame: &mut Frame, area: Rect, app: &AppState) {
    let point = |pwm: i32, flow: f64| {
        if pwm > 0 {
            format!("PWM={pwm}, FLOW={flow:.3}")
        } else {
            "--".to_string()
        }
    };
    let result = app.result.map_or_else(
        || "--".to_string(),
        |fit| format!("slope={:.2}, offset={}", fit.slope, fit.offset),
    );

    let lines = vec![
        labelled("Point 1: ", point(app.points.pwm1, app.points.flow1)),
        labelled("Point 2: ", point(app.points.pwm2, app.points.flow2)),
        labelled("Result:  ", result),
    ];
    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Calibration")
            .border_style(Style::default().fg(Color::LightYellow)),
    );
    frame.render_widget(paragraph, area);
}

fn render_log(frame: &mut Frame, area: Rect, app: &AppState) {
    let visible = usize::from(area.height.saturating_sub(2));
    let skip = app.log.len().saturating_sub(visible);
    let lines: Vec<Line> = app
        .log
        .iter()
        .skip(skip)
        .map(|line| Line::from(line.as_str()))
        .collect();

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Log")
            .border_style(Style::default().fg(Color::Gray)),
    );
    frame.render_widget(paragraph, area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let text = Line::from(vec![
        Span::styled("s/Space", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" start/stop calibration  "),
        Span::styled("c", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" clear log  "),
        Span::styled("q", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" quit"),
    ]);
    let paragraph = Paragraph::new(text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Controls")
                .border_style(Style::default().fg(Color::LightMagenta)),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}

fn labelled(label: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(label, Style::default().fg(Color::Gray)),
        Span::styled(value, Style::default().add_modifier(Modifier::BOLD)),
    ])
}

fn chart_bounds(data: &[(f64, f64)], area: Rect) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 1.0);
    }
    let max_tick = data.last().map_or(0.0, |(x, _)| *x).max(1.0);
    let window = area.width.saturating_sub(2).max(1) as usize;
    let window_ticks = u32::try_from(window.min(data.len().max(1)))
        .ok()
        .map_or(f64::from(u32::MAX), f64::from);
    let min_tick = if max_tick > window_ticks {
        max_tick - window_ticks
    } else {
        0.0
    };
    (min_tick, max_tick)
}

fn series_max(series: &VecDeque<(f64, f64)>) -> f64 {
    series.iter().map(|(_, value)| *value).fold(0.0, f64::max)
}
